//! CTFd integration: the remote boundary trait and its HTTP implementation.

pub mod api;
pub mod client;

pub use api::{
    ChallengeApi, ChallengePatch, NewChallenge, RemoteChallenge, RemoteRequirements, RemoteTag,
    RemoteTopic, TOPIC_OWNER_CHALLENGE,
};
pub use client::CtfdClient;
