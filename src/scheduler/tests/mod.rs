//! Unit tests for the scheduling engine.

mod support;
