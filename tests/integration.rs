//! Integration tests for dynaforge.

mod common;

#[path = "integration/crud_test.rs"]
mod crud_test;

#[path = "integration/concurrent_test.rs"]
mod concurrent_test;

#[path = "integration/propagation_test.rs"]
mod propagation_test;

#[path = "integration/convergence_test.rs"]
mod convergence_test;
