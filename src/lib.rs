pub mod depth_machine;
pub mod quad_machine;
pub mod miner_machine;
pub mod miner_controller;
pub mod miner_runner;

pub mod miner_hal;
pub mod miner_hal_mock;
pub mod miner_hal_factory;
pub mod miner_config;
pub mod resume_token;
pub mod rig_command;
