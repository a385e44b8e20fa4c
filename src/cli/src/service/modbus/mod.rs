pub(crate) mod address;
pub(crate) mod connection;
pub(crate) mod frame;
pub(crate) mod register;
pub(crate) mod service;

pub(crate) use address::Convention;
pub(crate) use connection::{
  Backend, Connection, Disconnected, Params, Transport,
};
pub(crate) use register::*;
pub(crate) use service::*;
