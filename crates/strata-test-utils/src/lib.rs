//! Utilities shared by strata tests.
//!
//! [`Fixture`] builds an in-memory workspace from a single string. The fakes implement the
//! engine's collaborator traits over a tiny line-oriented source language:
//!
//! ```text
//! package name     optional; defaults to the directory name
//! import other     depends on package `other`
//! export Sym       exports a symbol
//! use Sym          uses a symbol that some import must export
//! todo             reported as a warning
//! error            fails type checking
//! panic            panics inside the type checker
//! slow             type checking blocks until cancelled
//! !load-error      fails the build-system query for the directory
//! ```

mod fakes;
mod fixtures;

pub use fakes::*;
pub use fixtures::*;
