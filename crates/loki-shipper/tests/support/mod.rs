#![allow(dead_code)]

pub mod collector;
