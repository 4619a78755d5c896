pub(crate) mod chain;

pub(crate) mod environment;

pub(crate) mod logging;

pub(crate) mod mem_db;
