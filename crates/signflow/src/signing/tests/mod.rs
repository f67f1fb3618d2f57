mod common;
mod webhook;
