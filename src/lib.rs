pub mod action;
pub mod app;
pub mod auth;
pub mod bot;
pub mod chat;
pub mod config;
pub mod digest;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod journal;
pub mod limits;
pub mod logbook;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod service;
pub mod session;
pub mod store;
pub mod view;
