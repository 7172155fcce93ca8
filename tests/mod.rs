extern crate aodv_mesh;
extern crate color_backtrace;

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

mod integration;
