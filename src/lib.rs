//! A Customizable Route Planning (CRP) engine for road networks with turn costs.
//!
//! The graph is preprocessed once into a multi-level partition overlay which is
//! independent of any cost function. A metric (hop count, distance, travel time)
//! can then be customized onto the overlay and shared read-only by any number of
//! query instances. Queries run on the base graph near source and target and
//! switch to increasingly coarse overlay levels in between.

#[macro_use]
pub mod report;
pub mod algo;
pub mod cli;
pub mod datastr;
pub mod io;
pub mod metrics;
