//! Types and helpers shared by the mixboard server and client.

pub mod api;
pub mod domain;
pub mod jwt;
pub mod timing;
