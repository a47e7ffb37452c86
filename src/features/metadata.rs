//! Customer / SKU metadata join and the shared categorical code space.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{info, warn};

use super::matrix::FeatureMatrix;
use super::panel::{PanelFeatures, RawFeatures, NUMERIC_FEATURES, N_NUMERIC};
use crate::data::{Dataset, RawTable, CUSTOMER_ID, PRODUCT_ID};
use crate::error::{ForecastError, Result};

pub const CATEGORICAL_CANDIDATES: [&str; 4] =
    ["customer_category", "customer_status", "grade_name", "unit_name"];

/// Stand-in for missing categorical values.
pub const UNKNOWN: &str = "UNKNOWN";

/// Ordinal encoding of one categorical column; codes are the ranks of the
/// sorted distinct values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryColumn {
    pub name: String,
    classes: Vec<String>,
}

impl CategoryColumn {
    pub fn fit<'a>(name: &str, values: impl IntoIterator<Item = &'a str>) -> Self {
        let classes: BTreeSet<&str> = values.into_iter().collect();
        Self {
            name: name.to_string(),
            classes: classes.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn encode(&self, value: &str) -> Option<u32> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(value))
            .ok()
            .map(|i| i as u32)
    }

    pub fn decode(&self, code: u32) -> Option<&str> {
        self.classes.get(code as usize).map(String::as_str)
    }

    /// Unseen values map to `UNKNOWN`'s code, or to `len()` when absent.
    pub fn encode_or_fallback(&self, value: &str) -> u32 {
        self.encode(value)
            .or_else(|| self.encode(UNKNOWN))
            .unwrap_or(self.classes.len() as u32)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CategoryCodebook {
    columns: Vec<CategoryColumn>,
}

impl CategoryCodebook {
    pub fn columns(&self) -> &[CategoryColumn] {
        &self.columns
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&CategoryColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Source {
    Base,
    Customer,
    Product,
}

/// A column of the joined table and where its values come from.
#[derive(Debug, Clone)]
struct JoinedColumn {
    name: String,
    source: Source,
    column: String,
}

fn base_columns(table: &RawTable) -> Vec<JoinedColumn> {
    table
        .headers()
        .iter()
        .map(|h| JoinedColumn {
            name: h.clone(),
            source: Source::Base,
            column: h.clone(),
        })
        .collect()
}

/// Left join column naming: overlapping non-key names get `_x` (left) and
/// `_y` (right).
fn merge_columns(
    left: Vec<JoinedColumn>,
    right: &RawTable,
    source: Source,
    key: &str,
) -> Vec<JoinedColumn> {
    let right_names: HashSet<&str> = right
        .headers()
        .iter()
        .map(String::as_str)
        .filter(|h| *h != key)
        .collect();
    let left_names: HashSet<String> = left.iter().map(|c| c.name.clone()).collect();

    let mut out: Vec<JoinedColumn> = left
        .into_iter()
        .map(|mut c| {
            if c.name != key && right_names.contains(c.name.as_str()) {
                c.name = format!("{}_x", c.name);
            }
            c
        })
        .collect();
    for h in right.headers().iter().filter(|h| h.as_str() != key) {
        let name = if left_names.contains(h) {
            format!("{}_y", h)
        } else {
            h.clone()
        };
        out.push(JoinedColumn {
            name,
            source,
            column: h.clone(),
        });
    }
    out
}

fn joined_columns(base: &RawTable, customers: &RawTable, skus: &RawTable) -> Vec<JoinedColumn> {
    let joined = merge_columns(base_columns(base), customers, Source::Customer, CUSTOMER_ID);
    merge_columns(joined, skus, Source::Product, PRODUCT_ID)
}

/// The `_x` variant wins over the bare name.
fn resolve_categoricals(joined: &[JoinedColumn]) -> Vec<String> {
    let has = |name: &str| joined.iter().any(|c| c.name == name);
    CATEGORICAL_CANDIDATES
        .iter()
        .filter_map(|c| {
            let suffixed = format!("{}_x", c);
            if has(&suffixed) {
                Some(suffixed)
            } else if has(*c) {
                Some(c.to_string())
            } else {
                None
            }
        })
        .collect()
}

fn index_by(table: &RawTable, key: &str) -> Result<HashMap<i64, usize>> {
    let col = table.require(key)?;
    let mut index = HashMap::with_capacity(table.n_rows());
    for row in 0..table.n_rows() {
        if let Some(id) = col.get_i64(row) {
            index.entry(id).or_insert(row);
        }
    }
    Ok(index)
}

struct JoinContext<'a> {
    customers: &'a RawTable,
    skus: &'a RawTable,
    customer_rows: HashMap<i64, usize>,
    sku_rows: HashMap<i64, usize>,
}

impl<'a> JoinContext<'a> {
    fn new(dataset: &'a Dataset) -> Result<Self> {
        Ok(Self {
            customers: &dataset.customers,
            skus: &dataset.skus,
            customer_rows: index_by(&dataset.customers, CUSTOMER_ID)?,
            sku_rows: index_by(&dataset.skus, PRODUCT_ID)?,
        })
    }

    fn warn_unmatched(&self, table: &str, keys: &[(i64, i64)]) {
        let customers = keys.iter().filter(|(c, _)| !self.customer_rows.contains_key(c)).count();
        let skus = keys.iter().filter(|(_, p)| !self.sku_rows.contains_key(p)).count();
        if customers > 0 || skus > 0 {
            warn!(
                "{}: {} rows without customer metadata, {} rows without sku metadata",
                table, customers, skus
            );
        }
    }

    /// String values of a joined column, missing cells as `UNKNOWN`.
    fn values(&self, base: &RawTable, col: &JoinedColumn, keys: &[(i64, i64)]) -> Vec<String> {
        let cell = |table: &RawTable, row: Option<usize>| {
            row.and_then(|r| table.column(&col.column).and_then(|c| c.get_text(r)))
        };
        keys.iter()
            .enumerate()
            .map(|(i, (customer, product))| {
                let value = match col.source {
                    Source::Base => cell(base, Some(i)),
                    Source::Customer => cell(self.customers, self.customer_rows.get(customer).copied()),
                    Source::Product => cell(self.skus, self.sku_rows.get(product).copied()),
                };
                value.unwrap_or_else(|| UNKNOWN.to_string())
            })
            .collect()
    }
}

/// Encoded model inputs for both sides of the panel.
#[derive(Debug, Clone)]
pub struct EncodedFeatures {
    pub train: FeatureMatrix,
    pub test: FeatureMatrix,
    pub codebook: CategoryCodebook,
}

impl EncodedFeatures {
    pub fn categorical_columns(&self) -> Vec<String> {
        self.codebook.names()
    }
}

struct CategoricalStrings {
    names: Vec<String>,
    train: Vec<Vec<String>>,
    test: Vec<Vec<String>>,
}

pub struct MetadataEncoder;

impl MetadataEncoder {
    /// Joins metadata, fits the codebook on train ∪ test and fills undefined
    /// numeric features with 0.
    pub fn fit_transform(dataset: &Dataset, features: &PanelFeatures) -> Result<EncodedFeatures> {
        let strings = Self::categorical_strings(dataset)?;
        info!("Encoding categorical variables: {:?}", strings.names);
        let columns = strings
            .names
            .iter()
            .enumerate()
            .map(|(k, name)| {
                let union = strings.train[k].iter().chain(strings.test[k].iter());
                CategoryColumn::fit(name, union.map(String::as_str))
            })
            .collect();
        let codebook = CategoryCodebook { columns };
        Self::assemble(features, &strings, codebook)
    }

    /// Encodes with a previously fitted codebook.
    pub fn transform_with(
        dataset: &Dataset,
        features: &PanelFeatures,
        codebook: &CategoryCodebook,
    ) -> Result<EncodedFeatures> {
        let strings = Self::categorical_strings(dataset)?;
        if strings.names != codebook.names() {
            return Err(ForecastError::ShapeMismatch {
                expected: format!("categorical columns {:?}", codebook.names()),
                got: format!("{:?}", strings.names),
            });
        }
        Self::assemble(features, &strings, codebook.clone())
    }

    fn categorical_strings(dataset: &Dataset) -> Result<CategoricalStrings> {
        info!("Merging customer and SKU metadata...");
        let ctx = JoinContext::new(dataset)?;
        let train_joined = joined_columns(&dataset.train_table, &dataset.customers, &dataset.skus);
        let test_joined = joined_columns(&dataset.test_table, &dataset.customers, &dataset.skus);
        let names = resolve_categoricals(&train_joined);

        let train_keys: Vec<(i64, i64)> =
            dataset.train.iter().map(|o| (o.customer_id, o.product_id)).collect();
        let test_keys: Vec<(i64, i64)> =
            dataset.test.iter().map(|t| (t.customer_id, t.product_id)).collect();
        ctx.warn_unmatched("train", &train_keys);
        ctx.warn_unmatched("test", &test_keys);

        let mut train = Vec::with_capacity(names.len());
        let mut test = Vec::with_capacity(names.len());
        for name in &names {
            let find = |joined: &[JoinedColumn]| joined.iter().find(|c| &c.name == name).cloned();
            let train_col = find(&train_joined)
                .ok_or_else(|| ForecastError::missing_column("train (joined)", name))?;
            let test_col = find(&test_joined)
                .ok_or_else(|| ForecastError::missing_column("test (joined)", name))?;
            train.push(ctx.values(&dataset.train_table, &train_col, &train_keys));
            test.push(ctx.values(&dataset.test_table, &test_col, &test_keys));
        }
        Ok(CategoricalStrings { names, train, test })
    }

    fn assemble(
        features: &PanelFeatures,
        strings: &CategoricalStrings,
        codebook: CategoryCodebook,
    ) -> Result<EncodedFeatures> {
        info!("Filling missing numerical values...");
        let train = build_matrix(&features.train, &strings.train, &codebook)?;
        let test = build_matrix(&features.test, &strings.test, &codebook)?;
        Ok(EncodedFeatures {
            train,
            test,
            codebook,
        })
    }
}

fn build_matrix(
    raw: &[RawFeatures],
    categorical: &[Vec<String>],
    codebook: &CategoryCodebook,
) -> Result<FeatureMatrix> {
    let k = codebook.columns().len();
    let mut values = Array2::<f64>::zeros((raw.len(), N_NUMERIC + k));
    for (i, row) in raw.iter().enumerate() {
        for (j, v) in row.iter().enumerate() {
            values[[i, j]] = v.unwrap_or(0.0);
        }
    }
    for (c, (column, strings)) in codebook.columns().iter().zip(categorical).enumerate() {
        for (i, s) in strings.iter().enumerate() {
            values[[i, N_NUMERIC + c]] = f64::from(column.encode_or_fallback(s));
        }
    }

    let names = NUMERIC_FEATURES
        .iter()
        .map(|s| s.to_string())
        .chain(codebook.names())
        .collect();
    FeatureMatrix::new(names, (N_NUMERIC..N_NUMERIC + k).collect(), values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Observation, QTY, ROW_ID, WEEK_START};
    use crate::features::panel::PanelFeatureBuilder;

    fn table(name: &str, headers: &[&str], rows: &[&[&str]]) -> RawTable {
        let cells = (0..headers.len())
            .map(|j| rows.iter().map(|r| r[j].to_string()).collect::<Vec<String>>())
            .collect();
        RawTable::from_columns(name, headers.iter().map(|h| h.to_string()).collect(), cells)
    }

    fn dataset() -> Dataset {
        let train_table = table(
            "train",
            &[CUSTOMER_ID, PRODUCT_ID, WEEK_START, QTY, "grade_name"],
            &[&["1", "10", "2024-01-01", "2", "G1"], &["2", "20", "2024-01-01", "0", "G2"]],
        );
        let test_table = table(
            "test",
            &[ROW_ID, CUSTOMER_ID, PRODUCT_ID, WEEK_START],
            &[&["t1", "2", "20", "2024-01-08"], &["t2", "3", "10", "2024-01-08"]],
        );
        let customers = table(
            "customer",
            &[CUSTOMER_ID, "customer_category", "customer_status"],
            &[&["1", "retail", "active"], &["2", "", "active"], &["3", "wholesale", "lapsed"]],
        );
        let skus = table(
            "sku",
            &[PRODUCT_ID, "grade_name", "unit_name"],
            &[&["10", "A", "kg"], &["20", "B", "crate"]],
        );
        Dataset::from_tables(train_table, test_table, customers, skus).unwrap()
    }

    #[test]
    fn test_codebook_encode_decode() {
        let col = CategoryColumn::fit("c", ["b", "a", "b", UNKNOWN]);
        assert_eq!(col.len(), 3);
        assert_eq!(col.encode(UNKNOWN), Some(0));
        assert_eq!(col.encode("a"), Some(1));
        assert_eq!(col.decode(col.encode("b").unwrap()), Some("b"));
        assert_eq!(col.encode_or_fallback("zzz"), col.encode(UNKNOWN).unwrap());

        let bare = CategoryColumn::fit("c", ["x"]);
        assert_eq!(bare.encode_or_fallback("y"), 1);
    }

    #[test]
    fn test_collision_prefers_suffixed_name() {
        let d = dataset();
        let joined = joined_columns(&d.train_table, &d.customers, &d.skus);
        let names = resolve_categoricals(&joined);
        assert_eq!(
            names,
            vec!["customer_category", "customer_status", "grade_name_x", "unit_name"]
        );
    }

    #[test]
    fn test_test_side_missing_resolved_column() {
        // train carries its own grade_name, test does not: grade_name_x
        // cannot be resolved on the test side
        let d = dataset();
        let f = PanelFeatureBuilder::build(&d.train, &d.test).unwrap();
        let err = MetadataEncoder::fit_transform(&d, &f).unwrap_err();
        assert!(matches!(err, ForecastError::MissingColumn { .. }));
    }

    #[test]
    fn test_shared_code_space() {
        let mut d = dataset();
        d.train_table = table(
            "train",
            &[CUSTOMER_ID, PRODUCT_ID, WEEK_START, QTY],
            &[&["1", "10", "2024-01-01", "2"], &["2", "20", "2024-01-01", "0"]],
        );
        d.train = vec![
            Observation {
                customer_id: 1,
                product_id: 10,
                week_start: crate::data::loader::parse_week("2024-01-01"),
                qty: 2.0,
            },
            Observation {
                customer_id: 2,
                product_id: 20,
                week_start: crate::data::loader::parse_week("2024-01-01"),
                qty: 0.0,
            },
        ];
        let f = PanelFeatureBuilder::build(&d.train, &d.test).unwrap();
        let enc = MetadataEncoder::fit_transform(&d, &f).unwrap();
        assert_eq!(
            enc.categorical_columns(),
            vec!["customer_category", "customer_status", "grade_name", "unit_name"]
        );

        let cat = enc.codebook.column("customer_category").unwrap();
        let cat_idx = N_NUMERIC;
        // customer 2 has an empty category in both train and test
        assert_eq!(enc.train.values()[[1, cat_idx]], f64::from(cat.encode(UNKNOWN).unwrap()));
        assert_eq!(enc.test.values()[[0, cat_idx]], enc.train.values()[[1, cat_idx]]);
        // "wholesale" only appears on the test side and still has a code
        let code = enc.test.values()[[1, cat_idx]] as u32;
        assert_eq!(cat.decode(code), Some("wholesale"));

        // numeric gaps are filled with 0
        assert_eq!(enc.train.values()[[0, 0]], 0.0);
        assert_eq!(enc.test.values()[[0, 0]], 0.0);
        assert_eq!(enc.train.categorical_indices(), &[12, 13, 14, 15]);
    }

    #[test]
    fn test_transform_with_fitted_codebook() {
        let d = dataset();
        let mut plain = d.clone();
        plain.train_table = table(
            "train",
            &[CUSTOMER_ID, PRODUCT_ID, WEEK_START, QTY],
            &[&["1", "10", "2024-01-01", "2"], &["2", "20", "2024-01-01", "0"]],
        );
        let f = PanelFeatureBuilder::build(&plain.train, &plain.test).unwrap();
        let fitted = MetadataEncoder::fit_transform(&plain, &f).unwrap();
        let again = MetadataEncoder::transform_with(&plain, &f, &fitted.codebook).unwrap();
        assert_eq!(again.test, fitted.test);

        let other = CategoryCodebook::default();
        assert!(MetadataEncoder::transform_with(&plain, &f, &other).is_err());
    }
}
