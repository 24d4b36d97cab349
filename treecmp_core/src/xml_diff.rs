//! Structural XML comparison.
//!
//! Documents are parsed into an owned tree and canonicalised before
//! comparison: comments and processing instructions are dropped, text and
//! CDATA are merged and trimmed (whitespace-only text disappears), namespace
//! declarations are not attributes and attribute order is ignored. Elements
//! and attributes are identified by namespace URI plus local name; prefix
//! spelling is still reported, as a SIMILAR difference.

use crate::dispatch::{FileKind, FormatComparator};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;
use treecmp_common::{ResultBuilder, TreeCmpError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlName {
    pub namespace: Option<String>,
    pub prefix: Option<String>,
    pub local: String,
}

impl XmlName {
    fn same_expanded(&self, other: &XmlName) -> bool {
        self.namespace == other.namespace && self.local == other.local
    }
}

impl fmt::Display for XmlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{}:{}", prefix, self.local),
            None => f.write_str(&self.local),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub name: XmlName,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: XmlName,
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    fn attribute(&self, name: &XmlName) -> Option<&XmlAttribute> {
        self.attributes.iter().find(|a| a.name.same_expanded(name))
    }

    /// `<b x="1"...>` when it has children, `<b x="1"/>` otherwise
    fn describe(&self) -> String {
        let mut out = format!("<{}", self.name);
        for attr in &self.attributes {
            out.push_str(&format!(" {}=\"{}\"", attr.name, attr.value));
        }
        out.push_str(if self.children.is_empty() { "/>" } else { "...>" });
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

impl XmlNode {
    fn label(&self) -> String {
        match self {
            XmlNode::Element(element) => element.name.to_string(),
            XmlNode::Text(_) => "#text".to_string(),
        }
    }

    fn describe(&self) -> String {
        match self {
            XmlNode::Element(element) => element.describe(),
            XmlNode::Text(text) => text.clone(),
        }
    }

    fn can_pair(&self, other: &XmlNode) -> bool {
        match (self, other) {
            (XmlNode::Text(_), XmlNode::Text(_)) => true,
            (XmlNode::Element(a), XmlNode::Element(b)) => a.name.same_expanded(&b.name),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub version: Option<String>,
    pub encoding: Option<String>,
    pub standalone: Option<String>,
    pub doctype: Option<String>,
    pub root: XmlElement,
}

fn xml_error(e: impl fmt::Display) -> TreeCmpError {
    TreeCmpError::Parse(e.to_string())
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn owned_namespace(resolved: ResolveResult) -> Result<Option<String>, TreeCmpError> {
    match resolved {
        ResolveResult::Bound(Namespace(ns)) => Ok(Some(lossy(ns))),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(TreeCmpError::Parse(format!(
            "Unknown namespace prefix '{}'",
            lossy(&prefix)
        ))),
    }
}

/// Only element events carry a meaningful resolution
fn element_namespace(
    is_element: bool,
    resolved: ResolveResult,
) -> Result<Option<String>, TreeCmpError> {
    if is_element {
        owned_namespace(resolved)
    } else {
        Ok(None)
    }
}

fn element_from(
    reader: &NsReader<&[u8]>,
    namespace: Option<String>,
    start: &BytesStart,
) -> Result<XmlElement, TreeCmpError> {
    let name = XmlName {
        namespace,
        prefix: start.name().prefix().map(|p| lossy(p.as_ref())),
        local: lossy(start.local_name().as_ref()),
    };

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }

        let (resolved, local) = reader.resolve_attribute(attr.key);
        let namespace = owned_namespace(resolved)?;
        attributes.push(XmlAttribute {
            name: XmlName {
                namespace,
                prefix: attr.key.prefix().map(|p| lossy(p.as_ref())),
                local: lossy(local.as_ref()),
            },
            value: attr.unescape_value().map_err(xml_error)?.into_owned(),
        });
    }

    Ok(XmlElement {
        name,
        attributes,
        children: Vec::new(),
    })
}

/// Move accumulated character data into the open element
fn flush_text(stack: &mut [XmlElement], pending: &mut String) -> Result<(), TreeCmpError> {
    let trimmed = pending.trim();
    if !trimmed.is_empty() {
        match stack.last_mut() {
            Some(parent) => parent.children.push(XmlNode::Text(trimmed.to_string())),
            None => {
                return Err(TreeCmpError::Parse(
                    "Text content outside the root element".to_string(),
                ))
            }
        }
    }
    pending.clear();
    Ok(())
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), TreeCmpError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(XmlNode::Element(element));
    } else if root.is_some() {
        return Err(TreeCmpError::Parse(format!(
            "Second root element <{}>",
            element.name
        )));
    } else {
        *root = Some(element);
    }
    Ok(())
}

/// Parse and canonicalise a document
pub fn parse_document(bytes: &[u8]) -> Result<XmlDocument, TreeCmpError> {
    let mut reader = NsReader::from_reader(bytes);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;
    let mut pending = String::new();
    let mut version = None;
    let mut encoding = None;
    let mut standalone = None;
    let mut doctype = None;

    loop {
        let (resolved, event) = reader.read_resolved_event_into(&mut buf).map_err(xml_error)?;
        let is_element = matches!(event, Event::Start(_) | Event::Empty(_));
        let namespace = element_namespace(is_element, resolved)?;

        match event {
            Event::Decl(decl) => {
                version = Some(lossy(&decl.version().map_err(xml_error)?));
                encoding = decl
                    .encoding()
                    .transpose()
                    .map_err(xml_error)?
                    .map(|e| lossy(&e));
                standalone = decl
                    .standalone()
                    .transpose()
                    .map_err(xml_error)?
                    .map(|s| lossy(&s));
            }
            Event::DocType(text) => {
                doctype = Some(lossy(&text).trim().to_string());
            }
            Event::Start(start) => {
                flush_text(&mut stack, &mut pending)?;
                stack.push(element_from(&reader, namespace, &start)?);
            }
            Event::Empty(start) => {
                flush_text(&mut stack, &mut pending)?;
                let element = element_from(&reader, namespace, &start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                flush_text(&mut stack, &mut pending)?;
                let element = stack
                    .pop()
                    .ok_or_else(|| TreeCmpError::Parse("Unexpected closing tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                pending.push_str(&text.unescape().map_err(xml_error)?);
            }
            Event::CData(cdata) => {
                pending.push_str(&String::from_utf8_lossy(&cdata.into_inner()));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(TreeCmpError::Parse(format!(
            "Unexpected end of document inside <{}>",
            open.name
        )));
    }
    flush_text(&mut stack, &mut pending)?;

    let root = root.ok_or_else(|| TreeCmpError::Parse("Document has no root element".to_string()))?;
    Ok(XmlDocument {
        version,
        encoding,
        standalone,
        doctype,
        root,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Similar,
    Different,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Similar => "SIMILAR",
            Outcome::Different => "DIFFERENT",
        })
    }
}

/// One side of a comparison: rendered node plus its XPath
struct Side<'a> {
    node: &'a str,
    xpath: &'a str,
}

fn opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("null")
}

struct Comparison<'r> {
    result: &'r mut ResultBuilder,
}

impl Comparison<'_> {
    fn report(
        &mut self,
        what: &str,
        expected: &str,
        actual: &str,
        control: Side<'_>,
        test: Side<'_>,
        outcome: Outcome,
    ) {
        self.result.difference(format!(
            "Expected {} '{}' but was '{}' - comparing {} at {} to {} at {} ({})",
            what, expected, actual, control.node, control.xpath, test.node, test.xpath, outcome
        ));
    }

    fn documents(&mut self, control: &XmlDocument, test: &XmlDocument) {
        // An absent declaration means version 1.0, not standalone
        let defaulted = |value: &Option<String>, default: &str| {
            Some(value.clone().unwrap_or_else(|| default.to_string()))
        };
        let declaration_checks = [
            (
                "xml version",
                defaulted(&control.version, "1.0"),
                defaulted(&test.version, "1.0"),
                Outcome::Different,
            ),
            (
                "xml standalone",
                defaulted(&control.standalone, "no"),
                defaulted(&test.standalone, "no"),
                Outcome::Different,
            ),
            (
                "doctype declaration",
                control.doctype.clone(),
                test.doctype.clone(),
                Outcome::Similar,
            ),
        ];
        for (what, expected, actual, outcome) in declaration_checks {
            if expected != actual {
                let here = Side { node: "#document", xpath: "/" };
                let there = Side { node: "#document", xpath: "/" };
                self.report(what, opt(&expected), opt(&actual), here, there, outcome);
            }
        }

        let same_encoding = match (&control.encoding, &test.encoding) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            (a, b) => a == b,
        };
        if !same_encoding {
            self.report(
                "xml encoding",
                opt(&control.encoding),
                opt(&test.encoding),
                Side { node: "#document", xpath: "/" },
                Side { node: "#document", xpath: "/" },
                Outcome::Similar,
            );
        }

        let control_path = format!("/{}[1]", control.root.name);
        let test_path = format!("/{}[1]", test.root.name);
        self.elements(&control.root, &test.root, &control_path, &test_path);
    }

    fn elements(&mut self, control: &XmlElement, test: &XmlElement, control_path: &str, test_path: &str) {
        let control_node = control.describe();
        let test_node = test.describe();
        let sides = || {
            (
                Side { node: &control_node, xpath: control_path },
                Side { node: &test_node, xpath: test_path },
            )
        };

        if control.name.namespace != test.name.namespace {
            let (c, t) = sides();
            self.report("namespace URI", opt(&control.name.namespace), opt(&test.name.namespace), c, t, Outcome::Different);
        }
        if control.name.prefix != test.name.prefix {
            let (c, t) = sides();
            self.report("namespace prefix", opt(&control.name.prefix), opt(&test.name.prefix), c, t, Outcome::Similar);
        }
        if control.name.local != test.name.local {
            let (c, t) = sides();
            self.report("element tag name", &control.name.local, &test.name.local, c, t, Outcome::Different);
        }

        if control.attributes.len() != test.attributes.len() {
            let (c, t) = sides();
            self.report(
                "number of attributes",
                &control.attributes.len().to_string(),
                &test.attributes.len().to_string(),
                c,
                t,
                Outcome::Different,
            );
        }

        for attr in &control.attributes {
            let control_attr_path = format!("{}/@{}", control_path, attr.name);
            match test.attribute(&attr.name) {
                Some(other) => {
                    let test_attr_path = format!("{}/@{}", test_path, other.name);
                    let c = Side { node: &control_node, xpath: &control_attr_path };
                    let t = Side { node: &test_node, xpath: &test_attr_path };
                    if attr.name.prefix != other.name.prefix {
                        self.report("namespace prefix", opt(&attr.name.prefix), opt(&other.name.prefix), c, t, Outcome::Similar);
                    }
                    if attr.value != other.value {
                        let c = Side { node: &control_node, xpath: &control_attr_path };
                        let t = Side { node: &test_node, xpath: &test_attr_path };
                        self.report("attribute value", &attr.value, &other.value, c, t, Outcome::Different);
                    }
                }
                None => {
                    let c = Side { node: &control_node, xpath: &control_attr_path };
                    let t = Side { node: &test_node, xpath: test_path };
                    self.report("attribute name", &attr.name.to_string(), "null", c, t, Outcome::Different);
                }
            }
        }
        for attr in &test.attributes {
            if control.attribute(&attr.name).is_none() {
                let test_attr_path = format!("{}/@{}", test_path, attr.name);
                let c = Side { node: &control_node, xpath: control_path };
                let t = Side { node: &test_node, xpath: &test_attr_path };
                self.report("attribute name", "null", &attr.name.to_string(), c, t, Outcome::Different);
            }
        }

        self.children(control, test, control_path, test_path, &control_node, &test_node);
    }

    fn children(
        &mut self,
        control: &XmlElement,
        test: &XmlElement,
        control_path: &str,
        test_path: &str,
        control_node: &str,
        test_node: &str,
    ) {
        if control.children.len() != test.children.len() {
            self.report(
                "child nodelist length",
                &control.children.len().to_string(),
                &test.children.len().to_string(),
                Side { node: control_node, xpath: control_path },
                Side { node: test_node, xpath: test_path },
                Outcome::Different,
            );
        }

        let control_paths = child_paths(control_path, &control.children);
        let test_paths = child_paths(test_path, &test.children);
        let (pairs, test_matched) = match_children(&control.children, &test.children);

        let mut control_matched = vec![false; control.children.len()];
        for &(ci, ti) in &pairs {
            control_matched[ci] = true;
            let c = &control.children[ci];
            let t = &test.children[ti];

            if ci != ti {
                let c_desc = c.describe();
                let t_desc = t.describe();
                self.report(
                    "child nodelist sequence",
                    &ci.to_string(),
                    &ti.to_string(),
                    Side { node: &c_desc, xpath: &control_paths[ci] },
                    Side { node: &t_desc, xpath: &test_paths[ti] },
                    Outcome::Similar,
                );
            }

            match (c, t) {
                (XmlNode::Element(ce), XmlNode::Element(te)) => {
                    self.elements(ce, te, &control_paths[ci], &test_paths[ti]);
                }
                (XmlNode::Text(ct), XmlNode::Text(tt)) if ct != tt => {
                    self.report(
                        "text value",
                        ct,
                        tt,
                        Side { node: ct, xpath: &control_paths[ci] },
                        Side { node: tt, xpath: &test_paths[ti] },
                        Outcome::Different,
                    );
                }
                _ => {}
            }
        }

        for (ci, child) in control.children.iter().enumerate() {
            if !control_matched[ci] {
                let desc = child.describe();
                self.report(
                    "child",
                    &child.label(),
                    "null",
                    Side { node: &desc, xpath: &control_paths[ci] },
                    Side { node: "null", xpath: test_path },
                    Outcome::Different,
                );
            }
        }
        for (ti, child) in test.children.iter().enumerate() {
            if !test_matched[ti] {
                let desc = child.describe();
                self.report(
                    "child",
                    "null",
                    &child.label(),
                    Side { node: "null", xpath: control_path },
                    Side { node: &desc, xpath: &test_paths[ti] },
                    Outcome::Different,
                );
            }
        }
    }
}

/// XPath of every child: `/a[1]/b[2]`, `/a[1]/text()[1]`
fn child_paths(parent: &str, children: &[XmlNode]) -> Vec<String> {
    let mut paths = Vec::with_capacity(children.len());
    for (idx, child) in children.iter().enumerate() {
        let position = children[..idx]
            .iter()
            .filter(|sibling| match (child, sibling) {
                (XmlNode::Text(_), XmlNode::Text(_)) => true,
                (XmlNode::Element(a), XmlNode::Element(b)) => a.name.to_string() == b.name.to_string(),
                _ => false,
            })
            .count()
            + 1;
        let step = match child {
            XmlNode::Element(element) => format!("{}[{}]", element.name, position),
            XmlNode::Text(_) => format!("text()[{}]", position),
        };
        paths.push(format!("{}/{}", parent, step));
    }
    paths
}

/// Pair each control child with the first unpaired test child of the same
/// kind, searching forward from the previous match and then wrapping around.
fn match_children(control: &[XmlNode], test: &[XmlNode]) -> (Vec<(usize, usize)>, Vec<bool>) {
    let mut matched = vec![false; test.len()];
    let mut pairs = Vec::new();
    let mut next = 0;

    for (ci, child) in control.iter().enumerate() {
        let found = (next..test.len())
            .chain(0..next.min(test.len()))
            .find(|&ti| !matched[ti] && child.can_pair(&test[ti]));
        if let Some(ti) = found {
            matched[ti] = true;
            pairs.push((ci, ti));
            next = ti + 1;
        }
    }

    (pairs, matched)
}

/// Engine for comparing XML documents structurally
pub struct XmlDiffEngine;

impl XmlDiffEngine {
    pub fn new() -> Self {
        Self
    }

    /// Compare two parsed documents, `control` being the source side
    pub fn compare_documents(&self, control: &XmlDocument, test: &XmlDocument, result: &mut ResultBuilder) {
        Comparison { result }.documents(control, test);
    }

    fn load(&self, path: &Path, side: &str) -> Result<XmlDocument, TreeCmpError> {
        let bytes = fs::read(path).map_err(|e| {
            TreeCmpError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read {} XML file: {}", side, e),
            ))
        })?;
        parse_document(&bytes)
            .map_err(|e| TreeCmpError::Parse(format!("Invalid {} XML document: {}", side, e)))
    }
}

impl Default for XmlDiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatComparator for XmlDiffEngine {
    fn kind(&self) -> FileKind {
        FileKind::Xml
    }

    fn label(&self) -> &'static str {
        "XML files"
    }

    fn compare_into(
        &self,
        source: &Path,
        target: &Path,
        result: &mut ResultBuilder,
    ) -> Result<(), TreeCmpError> {
        let control = self.load(source, "source")?;
        let test = self.load(target, "target")?;

        self.compare_documents(&control, &test, result);
        debug!("{}: {} XML differences", result.path(), result.difference_count());
        Ok(())
    }
}
