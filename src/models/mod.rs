//! # Models
//!
//! Bayesian models over categorical site data. Currently the contact-zone
//! mixture sampler.

pub mod zones;
