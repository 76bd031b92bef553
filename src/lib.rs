#[macro_use]
pub mod buildcfg;

#[macro_use]
pub mod tools;

#[macro_use]
pub mod api_schema;

#[macro_use]
pub mod server {

    pub mod environment;
    pub mod formatter;
    #[macro_use]
    pub mod rest;

}

pub mod catar;

pub mod section_config;

pub mod backup;

pub mod config;

pub mod storage {

    pub mod config;
    pub mod futures;
}

pub mod cli {

    pub mod environment;
    pub mod command;
}


pub mod api2;

pub mod client;

pub mod getopts;
pub mod auth_helpers;
