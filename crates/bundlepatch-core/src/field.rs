//! Typed field trees produced by a [`TypeResolver`](crate::resolver::TypeResolver).
//!
//! A field tree is the generic object graph obtained by reading an object's
//! bytes against its type layout. Every node is exactly one of: a scalar
//! leaf, an array (of child nodes or of raw bytes) or a composite object.
//! Child order is declaration order in the originating layout and is
//! significant for array and dictionary reconstruction.

use serde::{Deserialize, Serialize};

/// One node of a field tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldNode {
    /// Field name, unique among siblings.
    pub name: String,
    /// Node shape and payload.
    #[serde(flatten)]
    pub kind: FieldKind,
}

/// The three node shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum FieldKind {
    /// Leaf carrying a typed value.
    Scalar { value: ScalarValue },
    /// Homogeneous sequence.
    Array { items: ArrayItems },
    /// Composite with named children in declaration order.
    Object { children: Vec<FieldNode> },
}

/// Array payload: byte arrays keep their raw bytes instead of child nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayItems {
    Bytes(Vec<u8>),
    Elements(Vec<FieldNode>),
}

/// Typed scalar value of a leaf node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ScalarValue {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    #[serde(rename = "uint8")]
    UInt8(u8),
    #[serde(rename = "uint16")]
    UInt16(u16),
    #[serde(rename = "uint32")]
    UInt32(u32),
    #[serde(rename = "uint64")]
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    /// Side-table of polymorphic objects referenced from the tree.
    ManagedReferences(ManagedReferenceRegistry),
    /// Untyped blob stored on a non-array field.
    Blob(Vec<u8>),
}

/// Versioned table of polymorphically typed referenced objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedReferenceRegistry {
    /// Registry layout version; only 1 and 2 are readable.
    pub version: u32,
    /// Referenced objects in table order.
    #[serde(default)]
    pub references: Vec<ReferencedObject>,
}

/// One entry of a [`ManagedReferenceRegistry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencedObject {
    /// Reference id within the registry.
    #[serde(default)]
    pub rid: i64,
    /// Field tree of the referenced object.
    pub data: FieldNode,
}

impl FieldNode {
    pub fn scalar(name: impl Into<String>, value: ScalarValue) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Scalar { value },
        }
    }

    pub fn object(name: impl Into<String>, children: Vec<FieldNode>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Object { children },
        }
    }

    pub fn array(name: impl Into<String>, elements: Vec<FieldNode>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Array {
                items: ArrayItems::Elements(elements),
            },
        }
    }

    pub fn byte_array(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Array {
                items: ArrayItems::Bytes(bytes),
            },
        }
    }

    /// Child nodes in declaration order.
    ///
    /// Object children or array elements; empty for scalars and byte arrays.
    pub fn children(&self) -> &[FieldNode] {
        match &self.kind {
            FieldKind::Object { children } => children,
            FieldKind::Array {
                items: ArrayItems::Elements(elements),
            } => elements,
            _ => &[],
        }
    }

    /// First child with the given name.
    pub fn child(&self, name: &str) -> Option<&FieldNode> {
        self.children().iter().find(|c| c.name == name)
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, FieldKind::Array { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_by_shape() {
        let obj = FieldNode::object(
            "Base",
            vec![
                FieldNode::scalar("m_Enabled", ScalarValue::UInt8(1)),
                FieldNode::byte_array("m_Data", vec![1, 2]),
            ],
        );
        assert_eq!(obj.children().len(), 2);
        assert!(obj.child("m_Data").unwrap().is_array());
        assert!(obj.child("m_Data").unwrap().children().is_empty());
        assert!(obj.child("missing").is_none());
    }

    #[test]
    fn test_dump_shape_is_tagged() {
        let node = FieldNode::scalar("m_Speed", ScalarValue::Float(1.5));
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["name"], "m_Speed");
        assert_eq!(json["shape"], "scalar");
        assert_eq!(json["value"]["type"], "float");

        let back: FieldNode = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }
}
