//! Query engine for relq.
//!
//! Requests are compiled into predicate trees and load plans, executed
//! against the [`Storage`](crate::storage::Storage) collaborator, and stitched
//! back into nested records.

mod aggregate;
pub(crate) mod compare;
mod executor;
mod filter;
mod mutation;
mod pagination;
mod planner;
mod shaper;
mod stitcher;

pub mod predicate;

pub use aggregate::{AggregatePlan, AggregatePlanner, Column, GroupByPlan};
pub use compare::{compare_rows, compare_values, values_equal};
pub use executor::{PreparedRequest, QueryExecutor};
pub use filter::PredicateCompiler;
pub use mutation::{CreatePlan, InverseWrite, MutationPlanner, OwnedWrite, UpdatePlan};
pub use planner::{CountPlan, LoadPlan, LoadPlanNode, QueryDescriptor, RelationPlan, SelectionResolver};
pub use predicate::PredicateNode;
pub use stitcher::RelationStitcher;
