//! Core services: item store, claim lifecycle, box state machine, expiry
//! sweeper, similarity ranking, and the facade that ties them together.

pub mod box_controller;
pub mod claim_manager;
pub mod expiry_sweeper;
pub mod item_store;
pub mod lost_found_service;
pub mod search_ranker;
