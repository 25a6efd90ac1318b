use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

use itertools::Itertools;

/// Sentinel index carrying an array's element count when flattened into the
/// per-game store.
pub const ARRAY_SIZE_KEY: &str = "ARRAYSIZE";

/// A script value. Arithmetic coerces numeric strings; everything else
/// stringifies.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Num(f64),
    Array(Vec<Value>),
}

impl Default for Value {
    fn default() -> Self {
        Self::Str(String::new())
    }
}

impl Value {
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Num(n) => format_number(*n),
            Self::Array(items) => items.iter().map(Self::text).join(","),
        }
    }

    #[must_use]
    pub fn number(&self) -> f64 {
        match self {
            Self::Str(s) => s.trim().parse().unwrap_or(0.0),
            Self::Num(n) => *n,
            Self::Array(_) => 0.0,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Flattens a value into `(path, scalar)` rows for persistence. Arrays use
/// one-based `name[index]` paths plus a `name[ARRAYSIZE]` sentinel so they
/// can be rebuilt in order.
#[must_use]
pub fn flatten(name: &str, value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Array(items) => {
            let mut rows = vec![(format!("{name}[{ARRAY_SIZE_KEY}]"), items.len().to_string())];
            for (i, item) in items.iter().enumerate() {
                rows.extend(flatten(&format!("{name}[{}]", i + 1), item));
            }
            rows
        }
        scalar => vec![(name.to_string(), scalar.text())],
    }
}

/// Rebuilds a value previously flattened under `name`. Scalars come back as
/// strings; missing array elements come back empty.
#[must_use]
pub fn reconstruct(name: &str, rows: &HashMap<String, String>) -> Option<Value> {
    if let Some(size) = rows.get(&format!("{name}[{ARRAY_SIZE_KEY}]")) {
        let size = size.parse::<usize>().ok()?;
        let items = (1..=size)
            .map(|i| reconstruct(&format!("{name}[{i}]"), rows).unwrap_or_default())
            .collect();
        return Some(Value::Array(items));
    }

    rows.get(name).cloned().map(Value::Str)
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::{flatten, reconstruct, Value};

    #[test]
    fn numeric_strings_coerce() {
        assert_eq!(Value::Str("42".to_string()).number(), 42.0);
        assert_eq!(Value::Str("bogus".to_string()).number(), 0.0);
        assert_eq!(Value::Num(1.5).number(), 1.5);
    }

    #[test]
    fn whole_numbers_stringify_without_fraction() {
        assert_eq!(Value::Num(42.0).text(), "42");
        assert_eq!(Value::Num(1.5).text(), "1.5");
    }

    #[test]
    fn scalar_round_trip() {
        let rows: HashMap<_, _> = flatten("credits", &Value::Str("10000".to_string()))
            .into_iter()
            .collect();

        assert_eq!(
            reconstruct("credits", &rows),
            Some(Value::Str("10000".to_string()))
        );
    }

    #[test]
    fn array_round_trip_preserves_order() {
        let original = Value::Array(vec![
            Value::Str("alpha".to_string()),
            Value::Str("beta".to_string()),
            Value::Str("gamma".to_string()),
        ]);

        let rows: HashMap<_, _> = flatten("names", &original).into_iter().collect();
        assert_eq!(rows.get("names[ARRAYSIZE]"), Some(&"3".to_string()));
        assert_eq!(rows.get("names[1]"), Some(&"alpha".to_string()));

        let rebuilt = reconstruct("names", &rows).unwrap();
        let Value::Array(items) = rebuilt else {
            panic!("expected array");
        };
        assert_eq!(
            items,
            vec![
                Value::Str("alpha".to_string()),
                Value::Str("beta".to_string()),
                Value::Str("gamma".to_string()),
            ]
        );
    }

    #[test]
    fn nested_arrays_flatten_per_level() {
        let original = Value::Array(vec![Value::Array(vec![Value::Str("x".to_string())])]);

        let rows: HashMap<_, _> = flatten("grid", &original).into_iter().collect();
        assert_eq!(rows.get("grid[ARRAYSIZE]"), Some(&"1".to_string()));
        assert_eq!(rows.get("grid[1][ARRAYSIZE]"), Some(&"1".to_string()));
        assert_eq!(rows.get("grid[1][1]"), Some(&"x".to_string()));

        assert_eq!(
            reconstruct("grid", &rows),
            Some(Value::Array(vec![Value::Array(vec![Value::Str(
                "x".to_string()
            )])]))
        );
    }

    #[test]
    fn missing_variable_reconstructs_to_none() {
        assert_eq!(reconstruct("absent", &HashMap::new()), None);
    }
}
