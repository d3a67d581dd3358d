//! Vendor extension data.
//!
//! Integrators can queue extra elements onto an outbound message; they are
//! appended after the command body when the message is serialized. Extension
//! data is an outbound-only concern: the load path never consults it, vendors
//! that need inbound extras read the retained document directly.

use crate::xml::XmlNode;

/// An ordered key/value/children tree appended to an outbound body.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ExtendNode {
    pub name: String,
    pub value: Option<String>,
    pub children: Vec<ExtendNode>,
}

impl ExtendNode {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        ExtendNode { name: name.into(), value: Some(value.into()), children: Vec::new() }
    }

    pub fn with_children(name: impl Into<String>, children: Vec<ExtendNode>) -> Self {
        ExtendNode { name: name.into(), value: None, children }
    }

    /// Convert to an XML element, recursively.
    pub fn to_node(&self) -> XmlNode {
        if self.children.is_empty() {
            match &self.value {
                Some(v) => XmlNode::leaf(&self.name, v.clone()),
                None => XmlNode { name: self.name.clone(), ..Default::default() },
            }
        } else {
            XmlNode::branch(&self.name, self.children.iter().map(ExtendNode::to_node).collect())
        }
    }
}
