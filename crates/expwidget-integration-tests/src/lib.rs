//! Integration tests for the experiment widget live in `tests/`; they drive
//! `expwidget-core` through its `testing` harness.
