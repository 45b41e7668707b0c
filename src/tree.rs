//! Owned document tree produced by a successful parse.

/// A parsed document: the optional XML declaration plus the single root
/// element. Prolog trivia (comments, processing instructions, DOCTYPE) is
/// accepted by the parser but not retained here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlTree {
    pub declaration: Option<XmlDeclaration>,
    pub root: XmlElement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDeclaration {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<String>,
}

impl Default for XmlDeclaration {
    fn default() -> Self {
        XmlDeclaration {
            version: "1.0".to_owned(),
            encoding: None,
            standalone: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    /// Character data with all references already resolved.
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        XmlElement {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Value of the attribute called `name`, if present.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn first_child_element(&self, name: &str) -> Option<&XmlElement> {
        self.child_elements().find(|element| element.name == name)
    }

    /// Concatenated character data of the direct text and CDATA children.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            match node {
                XmlNode::Text(value) | XmlNode::CData(value) => out.push_str(value),
                _ => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> XmlElement {
        let mut root = XmlElement::new("details");
        root.attributes.push(XmlAttribute {
            name: "lang".to_owned(),
            value: "en".to_owned(),
        });
        let mut url = XmlElement::new("url");
        url.children.push(XmlNode::Text("http://a".to_owned()));
        root.children.push(XmlNode::Element(url));
        root.children
            .push(XmlNode::Comment("ignored".to_owned()));
        root.children.push(XmlNode::Element(XmlElement::new("id")));
        root
    }

    #[test]
    fn attribute_lookup() {
        let root = sample();
        assert_eq!(root.attribute("lang"), Some("en"));
        assert_eq!(root.attribute("missing"), None);
    }

    #[test]
    fn child_element_traversal() {
        let root = sample();
        let names: Vec<_> = root.child_elements().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["url", "id"]);
        assert_eq!(root.first_child_element("id").unwrap().name, "id");
        assert!(root.first_child_element("nope").is_none());
    }

    #[test]
    fn text_concatenates_text_and_cdata() {
        let mut element = XmlElement::new("mixed");
        element.children.push(XmlNode::Text("a".to_owned()));
        element
            .children
            .push(XmlNode::CData("<raw>".to_owned()));
        element.children.push(XmlNode::Element(XmlElement::new("b")));
        element.children.push(XmlNode::Text("c".to_owned()));
        assert_eq!(element.text(), "a<raw>c");
    }
}
