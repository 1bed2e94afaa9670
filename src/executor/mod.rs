//! Test execution engine
//!
//! Persistent worker dispatch, failure aggregation and the end-to-end suite
//! runner that ties them to the install phase.

mod aggregate;
mod dispatcher;
mod runner;
#[cfg(test)]
pub(crate) mod testing;
mod worker;

pub use aggregate::Verdict;
pub use dispatcher::DispatchOptions;
pub use runner::{RunReport, SuiteRunner};

#[cfg(test)]
pub(crate) use aggregate::FailureAggregator;
