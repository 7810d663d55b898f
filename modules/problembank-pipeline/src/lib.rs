//! Problem bank intelligence pipeline: extraction, similarity and clustering.
//!
//! `ProblemBank` is the entry point. It owns the store handles and exposes the
//! operations the API and CLI call.

pub mod clustering;
pub mod extractor;
pub mod service;
pub mod similarity;
pub mod theme;

pub use clustering::{ClusterBuilder, CreateClusterRequest};
pub use extractor::{ExtractionOutcome, Extractor};
pub use service::{ClusterDetail, ClusterListing, ListClustersQuery, ProblemBank};
pub use similarity::{SimilarityEngine, SimilarityReport, SimilarityRequest};
