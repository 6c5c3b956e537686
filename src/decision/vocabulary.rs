//! Risk-factor vocabulary tables.
//!
//! Data, not code: the engine only asks "does the prompt contain any of
//! these", so tuning a factor means editing a list here.

pub const MULTI_FILE_TERMS: &[&str] = &[
    "across",
    "all files",
    "entire",
    "everywhere",
    "multiple files",
    "codebase",
    "project-wide",
    "every module",
    "throughout",
];

pub const SECURITY_TERMS: &[&str] = &[
    "password",
    "auth",
    "login",
    "token",
    "secret",
    "credential",
    "permission",
    "encrypt",
    "certificate",
    "oauth",
    "sql injection",
    "xss",
    "csrf",
];

pub const UI_TERMS: &[&str] = &[
    "layout",
    "css",
    "styling",
    "responsive",
    "ui",
    "frontend",
    "component",
    "animation",
    "flexbox",
    "grid",
    "modal",
    "dropdown",
];

pub const AMBIGUOUS_TERMS: &[&str] = &[
    "somehow",
    "maybe",
    "something",
    "stuff",
    "etc",
    "whatever",
    "figure out",
    "not sure",
    "some way",
];

pub const ARCHITECTURE_TERMS: &[&str] = &[
    "architecture",
    "redesign",
    "migration",
    "system design",
    "microservice",
    "rearchitect",
    "data model",
    "schema change",
];
