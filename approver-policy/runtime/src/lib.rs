//! Process bootstrap: command-line parsing, the kubert runtime, leader
//! election and the policy admission webhook.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use approver_policy_approvers as approvers;
pub use approver_policy_core as core;
pub use approver_policy_k8s_controller as controller;

mod admission;
mod args;
mod lease;

pub use self::{admission::Admission, args::Args};
