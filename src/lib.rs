pub mod api_config;
pub mod auth;
pub mod campaigns;
pub mod channels;
pub mod chat_flow;
pub mod contacts;
pub mod core;
pub mod dashboards;
pub mod fast_replies;
pub mod jobs;
pub mod main_module;
pub mod messages;
pub mod queues;
pub mod realtime;
pub mod settings;
pub mod tenants;
pub mod tickets;
pub mod users;
pub mod whatsapp;

pub use crate::core::shared;
