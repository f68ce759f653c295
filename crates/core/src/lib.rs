//! Murmur core: the control logic of a noise-reduction chain
//!
//! The audio platform (node scheduling, filtering, FFT analysis) is consumed
//! through the [`domain::graph::AudioGraph`] trait. Everything in this crate
//! configures nodes and reads measurements from them.

pub mod domain;
