//! Per-page resource registry (fonts, image XObjects, graphics states)
//!
//! Content streams reference resources by short names (`/F1`, `/Im2`, `/GS1`).
//! The registry hands out those names while the content stream is generated,
//! often before the backing objects exist. Each entry is therefore either
//! [`Binding::Pending`] or [`Binding::Bound`]; serializing a registry that
//! still holds a pending entry is an error instead of a dangling `0 0 R`.

use crate::{PdfError, Result};
use std::collections::{BTreeMap, HashMap};

/// Resource namespace within a page's Resources dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Font,
    XObject,
    ExtGState,
}

impl ResourceKind {
    fn prefix(self) -> &'static str {
        match self {
            ResourceKind::Font => "F",
            ResourceKind::XObject => "Im",
            ResourceKind::ExtGState => "GS",
        }
    }
}

/// Object-number state of one resource entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Name handed out, object not created yet
    Pending,
    /// Backed by this object number
    Bound(u32),
}

impl Binding {
    fn from_placeholder(number: u32) -> Self {
        if number == 0 {
            Binding::Pending
        } else {
            Binding::Bound(number)
        }
    }

    pub fn object_number(self) -> Option<u32> {
        match self {
            Binding::Pending => None,
            Binding::Bound(n) => Some(n),
        }
    }
}

/// Resource names and object bindings for one page
///
/// Not shared between pages; each page build gets a fresh registry.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    /// Resource name -> binding; BTreeMap keeps names in lexicographic order
    fonts: BTreeMap<String, Binding>,
    xobjects: BTreeMap<String, Binding>,
    ext_gstates: BTreeMap<String, Binding>,
    /// Font ID (e.g. "std:Helvetica") -> resource name
    font_ids: HashMap<String, String>,
    /// Opacity bits -> ExtGState resource name
    ext_gstate_cache: HashMap<u64, String>,
    /// ExtGState resource name -> opacity, for entries created via the cache
    ext_gstate_opacity: HashMap<String, f64>,
    /// Names issued so far per namespace
    font_seq: u32,
    image_seq: u32,
    ext_gstate_seq: u32,
}

impl ResourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn next_name(&mut self, kind: ResourceKind) -> String {
        let seq = match kind {
            ResourceKind::Font => &mut self.font_seq,
            ResourceKind::XObject => &mut self.image_seq,
            ResourceKind::ExtGState => &mut self.ext_gstate_seq,
        };
        *seq += 1;
        format!("{}{}", kind.prefix(), seq)
    }

    fn namespace(&self, kind: ResourceKind) -> &BTreeMap<String, Binding> {
        match kind {
            ResourceKind::Font => &self.fonts,
            ResourceKind::XObject => &self.xobjects,
            ResourceKind::ExtGState => &self.ext_gstates,
        }
    }

    /// Register a font whose object number is already known
    ///
    /// Returns the resource name (`F1`, `F2`, ...).
    pub fn add_font(&mut self, object_number: u32) -> String {
        let name = self.next_name(ResourceKind::Font);
        self.fonts
            .insert(name.clone(), Binding::from_placeholder(object_number));
        name
    }

    /// Register a font keyed by a stable font ID
    ///
    /// A repeated ID returns the existing name and registers nothing new.
    /// `placeholder` may be 0, in which case the entry stays pending until
    /// [`set_font_object_number_by_id`](Self::set_font_object_number_by_id).
    pub fn add_font_with_id(&mut self, placeholder: u32, font_id: &str) -> String {
        if let Some(existing) = self.font_ids.get(font_id) {
            return existing.clone();
        }

        let name = self.next_name(ResourceKind::Font);
        self.fonts
            .insert(name.clone(), Binding::from_placeholder(placeholder));
        self.font_ids.insert(font_id.to_string(), name.clone());
        name
    }

    /// Bind the real object number of a font registered by ID
    ///
    /// Returns false if the ID was never registered on this page.
    pub fn set_font_object_number_by_id(&mut self, font_id: &str, object_number: u32) -> bool {
        let Some(name) = self.font_ids.get(font_id) else {
            return false;
        };
        self.fonts.insert(name.clone(), Binding::Bound(object_number));
        true
    }

    /// Resource name for a font ID, if registered
    pub fn font_resource_name(&self, font_id: &str) -> Option<&str> {
        self.font_ids.get(font_id).map(String::as_str)
    }

    /// Copy of the font ID -> resource name mapping
    pub fn font_id_mapping(&self) -> HashMap<String, String> {
        self.font_ids.clone()
    }

    /// Register an image XObject whose object number is already known
    pub fn add_image(&mut self, object_number: u32) -> String {
        let name = self.next_name(ResourceKind::XObject);
        self.xobjects
            .insert(name.clone(), Binding::from_placeholder(object_number));
        name
    }

    /// Reserve the next positional image name (`Im1`, `Im2`, ...) without an object
    pub fn add_image_placeholder(&mut self) -> String {
        self.add_image(0)
    }

    /// Bind an image name to its XObject number
    pub fn set_image_object_number(&mut self, name: &str, object_number: u32) -> bool {
        match self.xobjects.get_mut(name) {
            Some(binding) => {
                *binding = Binding::Bound(object_number);
                true
            }
            None => false,
        }
    }

    /// Register a graphics state whose object number is already known
    pub fn add_ext_gstate(&mut self, object_number: u32) -> String {
        let name = self.next_name(ResourceKind::ExtGState);
        self.ext_gstates
            .insert(name.clone(), Binding::from_placeholder(object_number));
        name
    }

    /// Get the ExtGState for an opacity, creating a pending one if needed
    ///
    /// Returns the resource name and whether it is new. `false` means an
    /// ExtGState for exactly this opacity already exists and no second object
    /// must be created.
    pub fn get_or_create_ext_gstate(&mut self, opacity: f64) -> (String, bool) {
        // -0.0 and 0.0 share one entry
        let opacity = if opacity == 0.0 { 0.0 } else { opacity };
        let key = opacity.to_bits();
        if let Some(name) = self.ext_gstate_cache.get(&key) {
            return (name.clone(), false);
        }

        let name = self.next_name(ResourceKind::ExtGState);
        self.ext_gstates.insert(name.clone(), Binding::Pending);
        self.ext_gstate_cache.insert(key, name.clone());
        self.ext_gstate_opacity.insert(name.clone(), opacity);
        (name, true)
    }

    /// Bind an ExtGState name to its object number
    pub fn set_ext_gstate_object_number(&mut self, name: &str, object_number: u32) -> bool {
        match self.ext_gstates.get_mut(name) {
            Some(binding) => {
                *binding = Binding::Bound(object_number);
                true
            }
            None => false,
        }
    }

    /// Object number of an ExtGState, if bound
    pub fn ext_gstate_object_number(&self, name: &str) -> Option<u32> {
        self.ext_gstates.get(name).and_then(|b| b.object_number())
    }

    /// ExtGStates created from an opacity that still need an object, in name order
    pub fn pending_ext_gstates(&self) -> Vec<(String, f64)> {
        self.ext_gstates
            .iter()
            .filter(|(_, binding)| **binding == Binding::Pending)
            .filter_map(|(name, _)| {
                self.ext_gstate_opacity
                    .get(name)
                    .map(|opacity| (name.clone(), *opacity))
            })
            .collect()
    }

    /// Binding of a named resource
    pub fn binding(&self, kind: ResourceKind, name: &str) -> Option<Binding> {
        self.namespace(kind).get(name).copied()
    }

    /// Number of entries in one namespace
    pub fn len(&self, kind: ResourceKind) -> usize {
        self.namespace(kind).len()
    }

    /// True if any resource is registered
    pub fn has_resources(&self) -> bool {
        !self.fonts.is_empty() || !self.xobjects.is_empty() || !self.ext_gstates.is_empty()
    }

    /// Names still waiting for an object number
    pub fn pending_names(&self) -> Vec<String> {
        [&self.fonts, &self.xobjects, &self.ext_gstates]
            .into_iter()
            .flat_map(|ns| ns.iter())
            .filter(|(_, binding)| **binding == Binding::Pending)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Serialize as a Resources dictionary
    ///
    /// ```text
    /// << /Font << /F1 5 0 R >> /XObject << /Im1 10 0 R >> /ProcSet [/PDF /Text /ImageB /ImageC /ImageI] >>
    /// ```
    ///
    /// Empty sub-dictionaries are omitted and an empty registry yields `<< >>`.
    /// Fails with [`PdfError::UnboundResource`] if any entry is still pending.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if let Some(name) = self.pending_names().into_iter().next() {
            return Err(PdfError::UnboundResource(name));
        }

        let mut out = String::from("<<");
        write_namespace(&mut out, "Font", &self.fonts);
        write_namespace(&mut out, "XObject", &self.xobjects);
        write_namespace(&mut out, "ExtGState", &self.ext_gstates);

        if self.has_resources() {
            out.push_str(" /ProcSet [/PDF /Text /ImageB /ImageC /ImageI]");
        }
        out.push_str(" >>");

        Ok(out.into_bytes())
    }
}

fn write_namespace(out: &mut String, key: &str, entries: &BTreeMap<String, Binding>) {
    if entries.is_empty() {
        return;
    }
    out.push_str(&format!(" /{key} <<"));
    for (name, binding) in entries {
        if let Binding::Bound(number) = binding {
            out.push_str(&format!(" /{name} {number} 0 R"));
        }
    }
    out.push_str(" >>");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn to_string(registry: &ResourceRegistry) -> String {
        String::from_utf8(registry.to_bytes().unwrap()).unwrap()
    }

    #[test]
    fn test_empty_registry() {
        let registry = ResourceRegistry::new();
        assert!(!registry.has_resources());
        assert_eq!(to_string(&registry), "<< >>");
    }

    #[test]
    fn test_sequential_names_per_namespace() {
        let mut registry = ResourceRegistry::new();
        assert_eq!(registry.add_font(5), "F1");
        assert_eq!(registry.add_font(6), "F2");
        assert_eq!(registry.add_image(10), "Im1");
        assert_eq!(registry.add_ext_gstate(15), "GS1");
        assert_eq!(registry.add_image(11), "Im2");
    }

    #[test]
    fn test_full_dictionary() {
        let mut registry = ResourceRegistry::new();
        registry.add_font(5);
        registry.add_image(10);
        registry.add_ext_gstate(15);

        assert_eq!(
            to_string(&registry),
            "<< /Font << /F1 5 0 R >> /XObject << /Im1 10 0 R >> /ExtGState << /GS1 15 0 R >> \
             /ProcSet [/PDF /Text /ImageB /ImageC /ImageI] >>"
        );
    }

    #[test]
    fn test_font_id_is_idempotent() {
        let mut registry = ResourceRegistry::new();
        let first = registry.add_font_with_id(0, "std:Helvetica");
        let second = registry.add_font_with_id(0, "std:Helvetica");

        assert_eq!(first, "F1");
        assert_eq!(first, second);
        assert_eq!(registry.len(ResourceKind::Font), 1);
    }

    #[test]
    fn test_deferred_font_binding() {
        let mut registry = ResourceRegistry::new();
        let name = registry.add_font_with_id(0, "custom:font_7");
        assert_eq!(
            registry.binding(ResourceKind::Font, &name),
            Some(Binding::Pending)
        );

        assert!(registry.set_font_object_number_by_id("custom:font_7", 42));
        assert_eq!(
            registry.binding(ResourceKind::Font, &name),
            Some(Binding::Bound(42))
        );
        assert_eq!(registry.font_resource_name("custom:font_7"), Some("F1"));
    }

    #[test]
    fn test_unknown_font_id_is_rejected() {
        let mut registry = ResourceRegistry::new();
        registry.add_font_with_id(0, "std:Courier");
        assert!(!registry.set_font_object_number_by_id("std:Times-Roman", 9));
    }

    #[test]
    fn test_pending_entry_fails_serialization() {
        let mut registry = ResourceRegistry::new();
        registry.add_font_with_id(0, "std:Helvetica");

        match registry.to_bytes() {
            Err(PdfError::UnboundResource(name)) => assert_eq!(name, "F1"),
            other => panic!("expected UnboundResource, got {other:?}"),
        }
    }

    #[test]
    fn test_ext_gstate_cache() {
        let mut registry = ResourceRegistry::new();
        let (name1, new1) = registry.get_or_create_ext_gstate(0.5);
        let (name2, new2) = registry.get_or_create_ext_gstate(0.5);
        let (name3, new3) = registry.get_or_create_ext_gstate(0.3);

        assert_eq!((name1.as_str(), new1), ("GS1", true));
        assert_eq!((name2.as_str(), new2), ("GS1", false));
        assert_eq!((name3.as_str(), new3), ("GS2", true));
        assert_eq!(
            registry.pending_ext_gstates(),
            vec![("GS1".to_string(), 0.5), ("GS2".to_string(), 0.3)]
        );

        assert!(registry.set_ext_gstate_object_number("GS1", 20));
        assert_eq!(registry.ext_gstate_object_number("GS1"), Some(20));
        assert_eq!(registry.pending_ext_gstates().len(), 1);
        assert!(!registry.set_ext_gstate_object_number("GS9", 21));
    }

    #[test]
    fn test_ext_gstate_zero_ignores_sign() {
        let mut registry = ResourceRegistry::new();
        let (name1, new1) = registry.get_or_create_ext_gstate(0.0);
        let (name2, new2) = registry.get_or_create_ext_gstate(-0.0);

        assert_eq!((name1.as_str(), new1), ("GS1", true));
        assert_eq!((name2.as_str(), new2), ("GS1", false));
        assert_eq!(registry.len(ResourceKind::ExtGState), 1);
        assert_eq!(registry.pending_ext_gstates()[0].1.to_bits(), 0.0f64.to_bits());
    }

    #[test]
    fn test_lexicographic_order() {
        let mut registry = ResourceRegistry::new();
        // Insert B before A
        registry.add_font_with_id(0, "std:Times-Roman");
        registry.add_font_with_id(0, "std:Courier");
        registry.set_font_object_number_by_id("std:Courier", 8);
        registry.set_font_object_number_by_id("std:Times-Roman", 7);

        assert_eq!(
            to_string(&registry),
            "<< /Font << /F1 7 0 R /F2 8 0 R >> /ProcSet [/PDF /Text /ImageB /ImageC /ImageI] >>"
        );
    }

    #[test]
    fn test_lexicographic_not_numeric_order() {
        let mut registry = ResourceRegistry::new();
        for n in 1..=10 {
            registry.add_image(100 + n);
        }
        let out = to_string(&registry);
        let im10 = out.find("/Im10 ").unwrap();
        let im2 = out.find("/Im2 ").unwrap();
        assert!(im10 < im2);
    }

    #[test]
    fn test_image_placeholders() {
        let mut registry = ResourceRegistry::new();
        let first = registry.add_image_placeholder();
        let second = registry.add_image_placeholder();
        assert_eq!((first.as_str(), second.as_str()), ("Im1", "Im2"));

        assert!(registry.set_image_object_number("Im1", 30));
        assert!(!registry.set_image_object_number("Im3", 31));
        assert!(matches!(
            registry.to_bytes(),
            Err(PdfError::UnboundResource(name)) if name == "Im2"
        ));

        assert!(registry.set_image_object_number("Im2", 31));
        assert_eq!(
            to_string(&registry),
            "<< /XObject << /Im1 30 0 R /Im2 31 0 R >> /ProcSet [/PDF /Text /ImageB /ImageC /ImageI] >>"
        );
    }
}
