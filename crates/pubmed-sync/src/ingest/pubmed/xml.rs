//! Streaming reader for PubMed article sets
//!
//! A decompressed archive holds tens of thousands of `PubmedArticle`
//! elements. [`ArticleReader`] walks the document with quick-xml and
//! materializes one article at a time into a small [`Element`] tree, which the
//! parser then queries with ElementTree-style paths.

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::{IngestError, Result};

/// Article element name directly under the document root
pub const ARTICLE_TAG: &str = "PubmedArticle";

/// One materialized XML element
///
/// `text` is the character data before the first child, `tail` the data after
/// this element's end tag (inside its parent), mirroring how mixed content
/// such as `<i>` inside a title is flattened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub tail: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether a `*YN` flag attribute is set to `Y`
    pub fn flag(&self, key: &str) -> bool {
        self.attr(key) == Some("Y")
    }

    /// Own text plus the text of every descendant, in document order
    pub fn flat_text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        out.push_str(&self.text);
        for child in &self.children {
            child.collect_text(out);
            out.push_str(&child.tail);
        }
    }

    /// Direct text, `None` when empty
    pub fn text_opt(&self) -> Option<&str> {
        if self.text.is_empty() {
            None
        } else {
            Some(self.text.as_str())
        }
    }

    /// First element matching `path`
    pub fn find(&self, path: &str) -> Option<&Element> {
        self.find_all(path).into_iter().next()
    }

    /// Direct text of the first element matching `path`, or `""`
    pub fn find_text(&self, path: &str) -> &str {
        self.find(path).map(|e| e.text.as_str()).unwrap_or("")
    }

    /// Every element matching `path`, in document order
    ///
    /// Supported syntax: `A/B` (child steps), a leading `.//` (descendants at
    /// any depth for the first step) and a trailing `[@Attr='value']`
    /// predicate on any step.
    pub fn find_all(&self, path: &str) -> Vec<&Element> {
        let (descendant, rest) = match path.strip_prefix(".//") {
            Some(rest) => (true, rest),
            None => (false, path),
        };

        let mut current: Vec<&Element> = vec![self];
        for (i, raw) in rest.split('/').enumerate() {
            let step = PathStep::parse(raw);
            let mut next = Vec::new();
            for element in current {
                if i == 0 && descendant {
                    element.descendants(&step, &mut next);
                } else {
                    next.extend(element.children.iter().filter(|c| step.matches(c)));
                }
            }
            if next.is_empty() {
                return next;
            }
            current = next;
        }
        current
    }

    fn descendants<'a>(&'a self, step: &PathStep<'_>, out: &mut Vec<&'a Element>) {
        for child in &self.children {
            if step.matches(child) {
                out.push(child);
            }
            child.descendants(step, out);
        }
    }
}

/// `Name` or `Name[@Attr='value']`
struct PathStep<'a> {
    name: &'a str,
    predicate: Option<(&'a str, &'a str)>,
}

impl<'a> PathStep<'a> {
    fn parse(raw: &'a str) -> Self {
        let Some((name, pred)) = raw.split_once('[') else {
            return Self { name: raw, predicate: None };
        };

        let predicate = pred
            .strip_suffix(']')
            .and_then(|p| p.strip_prefix('@'))
            .and_then(|p| p.split_once('='))
            .map(|(key, value)| (key, value.trim_matches(|c| c == '\'' || c == '"')));

        Self { name, predicate }
    }

    fn matches(&self, element: &Element) -> bool {
        element.name == self.name
            && self
                .predicate
                .is_none_or(|(key, value)| element.attr(key) == Some(value))
    }
}

/// Iterator over the `PubmedArticle` elements of one document
pub struct ArticleReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    depth: usize,
    done: bool,
}

impl ArticleReader<BufReader<File>> {
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::with_capacity(1024 * 1024, file)))
    }
}

impl<'a> ArticleReader<&'a [u8]> {
    pub fn from_bytes(bytes: &'a [u8]) -> Self {
        Self::new(bytes)
    }
}

impl<R: BufRead> ArticleReader<R> {
    pub fn new(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(false);
        Self {
            reader,
            buf: Vec::with_capacity(8192),
            depth: 0,
            done: false,
        }
    }

    fn next_article(&mut self) -> Result<Option<Element>> {
        loop {
            self.buf.clear();
            let start = match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) => {
                    self.depth += 1;
                    if self.depth == 2 && e.name().as_ref() == ARTICLE_TAG.as_bytes() {
                        open_element(&e)?
                    } else {
                        continue;
                    }
                },
                Event::Empty(e) => {
                    if self.depth == 1 && e.name().as_ref() == ARTICLE_TAG.as_bytes() {
                        return open_element(&e).map(Some);
                    }
                    continue;
                },
                Event::End(_) => {
                    self.depth = self.depth.saturating_sub(1);
                    continue;
                },
                Event::Eof => return Ok(None),
                _ => continue,
            };

            let article = self.read_subtree(start)?;
            self.depth -= 1;
            return Ok(Some(article));
        }
    }

    /// Consume events up to the end tag matching `root`
    fn read_subtree(&mut self, root: Element) -> Result<Element> {
        let mut stack = vec![root];

        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) => stack.push(open_element(&e)?),
                Event::Empty(e) => {
                    let element = open_element(&e)?;
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(element);
                    }
                },
                Event::Text(t) => append_text(&mut stack, &unescape_text(&t)),
                Event::CData(c) => append_text(&mut stack, &String::from_utf8_lossy(&c)),
                Event::End(_) => {
                    let Some(finished) = stack.pop() else {
                        return Err(IngestError::Xml("Unbalanced end tag".to_string()));
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(finished),
                        None => return Ok(finished),
                    }
                },
                Event::Eof => {
                    return Err(IngestError::Xml(format!(
                        "Unexpected end of document inside <{}>",
                        ARTICLE_TAG
                    )))
                },
                _ => {},
            }
        }
    }
}

impl<R: BufRead> Iterator for ArticleReader<R> {
    type Item = Result<Element>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_article() {
            Ok(Some(article)) => Some(Ok(article)),
            Ok(None) => {
                self.done = true;
                None
            },
            Err(e) => {
                self.done = true;
                Some(Err(e))
            },
        }
    }
}

fn open_element(start: &BytesStart<'_>) -> Result<Element> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()));

    for attr in start.attributes() {
        let attr = attr.map_err(|e| IngestError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| IngestError::Xml(e.to_string()))?
            .into_owned();
        element.attributes.push((key, value));
    }

    Ok(element)
}

fn unescape_text(text: &BytesText<'_>) -> String {
    match text.unescape() {
        Ok(s) => s.into_owned(),
        // Unknown entities (declared in the DTD) are kept verbatim
        Err(_) => String::from_utf8_lossy(text).into_owned(),
    }
}

fn append_text(stack: &mut [Element], text: &str) {
    let Some(top) = stack.last_mut() else {
        return;
    };
    match top.children.last_mut() {
        Some(last) => last.tail.push_str(text),
        None => top.text.push_str(text),
    }
}
