//! 远程命令执行服务库
//! 服务器档案管理、私钥存储与 SSH 命令执行

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod services;
pub mod ssh;
pub mod telemetry;
