//! Representation formats and the converter registry.
//!
//! `NDArray` and `Image` handles each own exactly one backing representation
//! (a native `ndarray` array, a serialized byte buffer, a script-side value,
//! ...). A [`Format`] identifies a representation type; a
//! [`FormatConverter`] turns a handle of one format into a new handle of
//! another.
//!
//! # Resolution
//!
//! [`ConverterRegistry::find`] resolves a `(source, target)` pair in two
//! passes, first registered wins within each pass:
//!
//! 1. converters registered for the handle's exact source format,
//! 2. capability converters (no fixed source) whose `can_convert` accepts it.
//!
//! No match is a [`PipeDataError::ConversionCapability`] naming both formats.
//!
//! # Lifetime
//!
//! A [`FormatRegistry`] is built once at startup and then shared immutably
//! behind an `Arc`. Registration needs `&mut self`, so concurrent readers
//! never observe a registry that is still being populated.

use crate::array::NDArray;
use crate::error::{PipeDataError, Result};
use crate::imaging::Image;
use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identity of a concrete representation type.
#[derive(Clone, Copy)]
pub struct Format {
    id: TypeId,
    name: &'static str,
}

impl Format {
    /// Format of the representation type `T`.
    pub fn of<T: FormatTag>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: T::NAME,
        }
    }

    /// Short human-readable name of the representation.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for Format {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Format {}

impl Hash for Format {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Format({})", self.name)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Static name for a representation type.
pub trait FormatTag: 'static {
    const NAME: &'static str;
}

/// A handle whose current backing representation can be identified.
pub trait Handle: Clone {
    fn format(&self) -> Format;
}

/// Converts handles between representations.
pub trait FormatConverter<H>: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// The exact source format this converter is registered for, or `None`
    /// for a capability converter that inspects the handle in `can_convert`.
    fn source(&self) -> Option<Format>;

    fn can_convert(&self, from: &H, to: Format) -> bool;

    fn convert(&self, from: &H, to: Format) -> Result<H>;
}

/// A converter backed by a plain function for one `source -> target` pair.
pub struct FnConverter<H> {
    name: &'static str,
    source: Option<Format>,
    target: Format,
    func: fn(&H) -> Result<H>,
}

impl<H> FnConverter<H> {
    /// Converter for exactly `source -> target`.
    pub fn exact(name: &'static str, source: Format, target: Format, func: fn(&H) -> Result<H>) -> Self {
        Self {
            name,
            source: Some(source),
            target,
            func,
        }
    }

    /// Converter from any source format to `target`.
    pub fn any_source(name: &'static str, target: Format, func: fn(&H) -> Result<H>) -> Self {
        Self {
            name,
            source: None,
            target,
            func,
        }
    }
}

impl<H: Handle> FormatConverter<H> for FnConverter<H> {
    fn name(&self) -> &str {
        self.name
    }

    fn source(&self) -> Option<Format> {
        self.source
    }

    fn can_convert(&self, from: &H, to: Format) -> bool {
        to == self.target && self.source.map_or(true, |s| s == from.format())
    }

    fn convert(&self, from: &H, to: Format) -> Result<H> {
        if !self.can_convert(from, to) {
            return Err(PipeDataError::ConversionCapability {
                from: from.format().name().to_string(),
                to: to.name().to_string(),
            });
        }
        (self.func)(from)
    }
}

/// Ordered set of converters for one handle kind.
pub struct ConverterRegistry<H> {
    converters: Vec<Arc<dyn FormatConverter<H>>>,
}

impl<H: Handle> ConverterRegistry<H> {
    pub fn new() -> Self {
        Self {
            converters: Vec::new(),
        }
    }

    /// Append a converter. Earlier registrations win ties.
    pub fn register(&mut self, converter: impl FormatConverter<H> + 'static) -> &mut Self {
        self.converters.push(Arc::new(converter));
        self
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// Find the converter for `from -> to`, preferring exact-source matches.
    pub fn find(&self, from: &H, to: Format) -> Option<&dyn FormatConverter<H>> {
        let source = from.format();
        self.converters
            .iter()
            .filter(|c| c.source() == Some(source))
            .chain(self.converters.iter().filter(|c| c.source().is_none()))
            .find(|c| c.can_convert(from, to))
            .map(|c| c.as_ref())
    }

    pub fn can_convert(&self, from: &H, to: Format) -> bool {
        from.format() == to || self.find(from, to).is_some()
    }

    /// Convert `from` into format `to`. Converting to the current format
    /// returns a clone of the handle.
    pub fn convert(&self, from: &H, to: Format) -> Result<H> {
        let source = from.format();
        if source == to {
            return Ok(from.clone());
        }

        let converter = self
            .find(from, to)
            .ok_or_else(|| PipeDataError::ConversionCapability {
                from: source.name().to_string(),
                to: to.name().to_string(),
            })?;

        tracing::trace!(
            converter = converter.name(),
            from = source.name(),
            to = to.name(),
            "converting handle"
        );
        converter.convert(from, to)
    }
}

impl<H: Handle> Default for ConverterRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// The NDArray and Image converter registries, built once and shared.
pub struct FormatRegistry {
    arrays: ConverterRegistry<NDArray>,
    images: ConverterRegistry<Image>,
}

/// Shared, read-only registry handle.
pub type SharedFormatRegistry = Arc<FormatRegistry>;

impl FormatRegistry {
    /// A registry with no converters at all.
    pub fn empty() -> Self {
        Self {
            arrays: ConverterRegistry::new(),
            images: ConverterRegistry::new(),
        }
    }

    /// A registry with every built-in converter: native, serialized and
    /// script representations for arrays; encoded, decoded and script
    /// representations for images.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        crate::array::register_defaults(&mut registry.arrays);
        crate::imaging::register_defaults(&mut registry.images);
        crate::scripting::register_converters(&mut registry);
        tracing::debug!(
            arrays = registry.arrays.len(),
            images = registry.images.len(),
            "built format registry"
        );
        registry
    }

    /// Build the default registry and wrap it for sharing.
    pub fn shared() -> SharedFormatRegistry {
        Arc::new(Self::with_defaults())
    }

    pub fn arrays(&self) -> &ConverterRegistry<NDArray> {
        &self.arrays
    }

    pub fn arrays_mut(&mut self) -> &mut ConverterRegistry<NDArray> {
        &mut self.arrays
    }

    pub fn images(&self) -> &ConverterRegistry<Image> {
        &self.images
    }

    pub fn images_mut(&mut self) -> &mut ConverterRegistry<Image> {
        &mut self.images
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("arrays", &self.arrays.len())
            .field("images", &self.images.len())
            .finish()
    }
}
