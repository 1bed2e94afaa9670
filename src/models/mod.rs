//! Data models for package test runs
//!
//! This module contains all data structures used throughout the application.

mod package;
mod response;
mod work_item;

pub use package::{PackageRef, PackageSet, Selection};
pub use response::{DecodeError, Response, Status};
pub use work_item::{Variant, WorkItem, WorkRequest};
