//! Promoter State: freight model and collaborator contracts
//!
//! This crate holds the data the promotion engine reads (freight, origins,
//! stage state) and the traits through which it reaches external systems.
//! It performs no I/O of its own.
//!
//! ## Key Components
//!
//! - `FreightCollection` / `FreightReference`: artifacts assigned to a promotion
//! - `StageState`: commits, images and charts a stage is moving to
//! - `CredentialsDb`, `ArgoCdClient`, `RenderService`, `GitClient`,
//!   `PullRequestClient`, `HelmClient`: collaborator contracts
//! - `fakes`: in-memory implementations for tests

pub mod collaborators;
mod error;
pub mod fakes;
mod freight;

pub use collaborators::{
    Application, ApplicationSource, ArgoCdClient, CredentialType, Credentials, CredentialsDb,
    DependencyUpdateRequest, GitClient, HelmClient, NewPullRequest, PullRequest,
    PullRequestClient, PullRequestState, PushOptions, PushOutcome, RenderAction, RenderRequest,
    RenderResponse, RenderService, TemplateRequest,
};
pub use error::{CollaboratorError, CollaboratorResult};
pub use freight::{
    Chart, FreightCollection, FreightOrigin, FreightReference, FreightRequest, FreightSources,
    GitCommit, Image, OriginKind, StageState,
};
