use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    #[default]
    F32,
    F64,
    I32,
    I64,
    U8,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum Dim {
    Static(usize),
    Variable(String),
}

impl Dim {
    /// Static extent, or `None` for symbolic and zero-sized (unbound) dims.
    pub fn fixed(&self) -> Option<usize> {
        match self {
            Dim::Static(v) if *v > 0 => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Static(v) => write!(f, "{}", v),
            Dim::Variable(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Shape {
    pub dims: Vec<Dim>,
}

impl Shape {
    pub fn from_static(dims: &[usize]) -> Self {
        Self { dims: dims.iter().map(|&d| Dim::Static(d)).collect() }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Concrete extents with every unbound dimension fixed to 1.
    pub fn concretize(&self) -> Vec<usize> {
        self.dims.iter().map(|d| d.fixed().unwrap_or(1)).collect()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(|d| d.to_string()).collect();
        write!(f, "[{}]", dims.join(", "))
    }
}

/// Declared tensor: name plus an optional shape/type descriptor.
/// `shape: None` is the unknown-shape placeholder.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct ValueInfo {
    pub name: String,
    #[serde(default)]
    pub dtype: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Shape>,
}

impl ValueInfo {
    pub fn new(name: &str, dtype: DataType, shape: Option<Shape>) -> Self {
        Self { name: name.to_string(), dtype, shape }
    }

    pub fn unknown(name: &str) -> Self {
        Self::new(name, DataType::F32, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_dims_concretize_to_one() {
        let shape = Shape {
            dims: vec![Dim::Variable("batch".into()), Dim::Static(3), Dim::Static(0), Dim::Static(8)],
        };
        assert_eq!(shape.concretize(), vec![1, 3, 1, 8]);
    }

    #[test]
    fn shape_json_is_untagged() {
        let shape: Shape = serde_json::from_str(r#"["N", 3, 32, 32]"#).unwrap();
        assert_eq!(shape.dims[0], Dim::Variable("N".into()));
        assert_eq!(shape.dims[1], Dim::Static(3));
        assert_eq!(shape.to_string(), "[N, 3, 32, 32]");
    }
}
