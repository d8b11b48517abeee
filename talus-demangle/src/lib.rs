//! Demangling support for C++ and Rust symbol names.
//!
//! Debug information and symbol tables usually carry mangled names. This
//! crate provides the [`Demangle`] extension trait over
//! [`Name`](talus_common::Name), which detects the mangling scheme and
//! produces a human readable name:
//!
//! - C++ (Itanium scheme, `_Z` prefixes) via `cpp_demangle`
//! - Rust (`legacy` and `v0` schemes) via `rustc-demangle`
//! - Swift symbols are detected but passed through untouched; there is no
//!   in-process Swift demangler.
//!
//! The demangling results should not be considered stable and may change
//! over time as the underlying demanglers evolve.
//!
//! # Examples
//!
//! ```
//! use talus_common::{Language, Name, NameMangling};
//! use talus_demangle::{Demangle, DemangleOptions};
//!
//! let name = Name::new("_ZN1n1fEi", NameMangling::Mangled, Language::Cpp);
//! assert_eq!(
//!     name.demangle(DemangleOptions::complete()).as_deref(),
//!     Some("n::f(int)")
//! );
//! ```

#![warn(missing_docs)]

use std::borrow::Cow;

use talus_common::{Language, Name, NameMangling};

/// Options for [`Demangle::demangle`].
///
/// One can choose between complete or name-only demangling. The resulting
/// output depends on the language of the mangled name; not every option
/// affects every language.
#[derive(Clone, Copy, Debug)]
pub struct DemangleOptions {
    parameters: bool,
}

impl DemangleOptions {
    /// Options that output a complete verbose demangling.
    pub const fn complete() -> Self {
        Self { parameters: true }
    }

    /// Options that output the most simple (likely name-only) demangling.
    pub const fn name_only() -> Self {
        Self { parameters: false }
    }

    /// Determines whether function argument types should be demangled.
    pub const fn parameters(mut self, parameters: bool) -> Self {
        self.parameters = parameters;
        self
    }
}

fn is_maybe_cpp(ident: &str) -> bool {
    ident.starts_with("_Z")
        || ident.starts_with("__Z")
        || ident.starts_with("___Z")
        || ident.starts_with("____Z")
}

fn is_maybe_swift(ident: &str) -> bool {
    // Swift 4+ ($S/$s), Swift 5 with prefix (_$s), and the legacy _T scheme.
    ident.starts_with("$S")
        || ident.starts_with("$s")
        || ident.starts_with("_$S")
        || ident.starts_with("_$s")
        || ident.starts_with("_T")
}

fn is_maybe_rust(ident: &str) -> bool {
    if ident.starts_with("_R") {
        return true;
    }

    // Legacy Rust mangling is Itanium with a trailing hash segment,
    // e.g. `..17h<16 hex digits>E`.
    rustc_demangle::try_demangle(ident).is_ok()
}

fn try_demangle_cpp(ident: &str, opts: DemangleOptions) -> Option<String> {
    let symbol = cpp_demangle::Symbol::new(ident).ok()?;

    let demangle_opts = cpp_demangle::DemangleOptions::default()
        .no_return_type()
        .hide_expression_literal_types();
    let demangle_opts = if opts.parameters {
        demangle_opts
    } else {
        demangle_opts.no_params()
    };

    symbol.demangle(&demangle_opts).ok()
}

fn try_demangle_rust(ident: &str, _opts: DemangleOptions) -> Option<String> {
    match rustc_demangle::try_demangle(ident) {
        // The alternate format strips the trailing hash from legacy names.
        Ok(demangled) => Some(format!("{:#}", demangled)),
        Err(_) => None,
    }
}

/// An extension trait on `Name`, providing demangling.
pub trait Demangle {
    /// Infers the language of a mangled name from its scheme.
    ///
    /// If the name is not mangled or the language cannot be detected, this
    /// returns `Language::Unknown`. A language declared on the name takes
    /// precedence over detection.
    fn detect_language(&self) -> Language;

    /// Demangles the name with the given options.
    ///
    /// Returns `None` if the name is not mangled in a supported scheme, or
    /// the demangler rejects it.
    fn demangle(&self, opts: DemangleOptions) -> Option<String>;

    /// Demangles the name and falls back to the original on failure.
    fn try_demangle(&self, opts: DemangleOptions) -> Cow<'_, str>;
}

impl<'a> Demangle for Name<'a> {
    fn detect_language(&self) -> Language {
        if self.language() != Language::Unknown {
            return self.language();
        }

        if self.mangling() == NameMangling::Unmangled {
            return Language::Unknown;
        }

        if is_maybe_swift(self.as_str()) {
            return Language::Swift;
        }

        // Rust detection must come first: legacy Rust names are valid
        // Itanium and would demangle as C++ with a hash suffix.
        if is_maybe_rust(self.as_str()) {
            return Language::Rust;
        }

        if is_maybe_cpp(self.as_str()) {
            return Language::Cpp;
        }

        Language::Unknown
    }

    fn demangle(&self, opts: DemangleOptions) -> Option<String> {
        if self.mangling() == NameMangling::Unmangled {
            return None;
        }

        match self.detect_language() {
            Language::Rust => try_demangle_rust(self.as_str(), opts),
            Language::Cpp | Language::ObjCpp | Language::C | Language::Unknown => {
                try_demangle_cpp(self.as_str(), opts)
            }
            // Swift names pass through untouched.
            _ => None,
        }
    }

    fn try_demangle(&self, opts: DemangleOptions) -> Cow<'_, str> {
        match self.demangle(opts) {
            Some(demangled) => Cow::Owned(demangled),
            None => Cow::Borrowed(self.as_str()),
        }
    }
}
