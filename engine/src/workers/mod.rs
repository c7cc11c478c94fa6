//! Agent Workers (spec §4.4): the Micro, Meso, and Meta tiers that turn
//! ingested papers into a ranked, cross-domain gap analysis.

pub mod meso;
pub mod meta;
pub mod micro;
pub mod prompts;
pub mod schemas;

pub use meso::DedupedGap;
pub use meta::MetaOutcome;
pub use micro::MicroOutcome;
pub use schemas::{GapType, IdentifiedGapBucket, MesoCluster, MesoOutput, MesoTheme, MicroGap, MicroOutput};
