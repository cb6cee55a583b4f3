//! Descriptor Catalog: the lookup contract between the
//! dispatcher and a device profile's descriptor tables.
//!
use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::usbdata::{descriptor_type, DescriptorRequest};

/// US English, the only language most devices declare.
pub const LANGUAGE_EN_US: u16 = 0x0409;

/// Source of descriptor bytes for GET_DESCRIPTOR.
///
/// `None` makes the dispatcher stall endpoint 0.
pub trait DescriptorCatalog: Send {
    /// Look up a descriptor.
    fn lookup(&self, req: &DescriptorRequest) -> Option<Cow<'_, [u8]>>;
}

/// Lookup function for one descriptor type, gets the index and
/// the language ID.
pub type LookupFn = Box<dyn Fn(u8, u16) -> Option<Vec<u8>> + Send>;

/// A catalog built from fixed tables.
///
/// Descriptors are keyed by (type, index); strings by index and
/// answered for language 0 or any declared language. A type can
/// instead be served by a lookup function, which takes precedence
/// over the tables.
#[derive(Default)]
pub struct StaticCatalog {
    descriptors: BTreeMap<(u8, u8), Vec<u8>>,
    strings: BTreeMap<u8, Vec<u8>>,
    languages: Vec<u16>,
    lookups: BTreeMap<u8, LookupFn>,
}

impl StaticCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor of `kind` at `index`.
    #[must_use]
    pub fn with(mut self, kind: u8, index: u8, bytes: impl Into<Vec<u8>>) -> Self {
        self.descriptors.insert((kind, index), bytes.into());
        self
    }

    /// Declare supported languages, this also provides string
    /// descriptor 0.
    #[must_use]
    pub fn with_languages(mut self, languages: &[u16]) -> Self {
        self.languages = languages.to_vec();
        self.strings.insert(0, language_descriptor(languages));
        self
    }

    /// Add string `index`. Index 0 is reserved for the language
    /// table.
    #[must_use]
    pub fn with_string(mut self, index: u8, s: &str) -> Self {
        debug_assert!(index != 0, "string 0 is the language table");
        self.strings.insert(index, string_descriptor(s));
        self
    }

    /// Serve all descriptors of `kind` from `f`.
    #[must_use]
    pub fn with_lookup(mut self, kind: u8, f: LookupFn) -> Self {
        self.lookups.insert(kind, f);
        self
    }

    fn string(&self, index: u8, language: u16) -> Option<&[u8]> {
        if index != 0 && language != 0 && !self.languages.contains(&language) {
            return None;
        }
        self.strings.get(&index).map(Vec::as_slice)
    }
}

impl DescriptorCatalog for StaticCatalog {
    fn lookup(&self, req: &DescriptorRequest) -> Option<Cow<'_, [u8]>> {
        if let Some(f) = self.lookups.get(&req.kind) {
            return f(req.index, req.language).map(Cow::Owned);
        }

        let found = match req.kind {
            descriptor_type::STRING => self.string(req.index, req.language),
            kind => self.descriptors.get(&(kind, req.index)).map(Vec::as_slice),
        };
        found.map(Cow::Borrowed)
    }
}

/// String descriptor holding `s` as UTF-16LE.
///
/// Strings longer than a descriptor can hold are cut.
pub fn string_descriptor(s: &str) -> Vec<u8> {
    let mut out = vec![0, descriptor_type::STRING];
    for unit in s.encode_utf16() {
        if out.len() + 2 > u8::MAX as usize {
            break;
        }
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out[0] = out.len() as u8;
    out
}

/// String descriptor 0, the table of supported language IDs.
///
/// Languages past what a descriptor can hold are dropped.
pub fn language_descriptor(languages: &[u16]) -> Vec<u8> {
    let mut out = vec![0, descriptor_type::STRING];
    for lang in languages {
        if out.len() + 2 > u8::MAX as usize {
            break;
        }
        out.extend_from_slice(&lang.to_le_bytes());
    }
    out[0] = out.len() as u8;
    out
}
