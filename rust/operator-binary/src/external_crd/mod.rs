//! Bindings for CRDs that are owned by other projects.

pub mod cert_manager;
