//! Types generated from `schema/demo.rpc` at build time.

pub mod generated {
    include!(concat!(env!("OUT_DIR"), "/demo.gen.rs"));
    include!(concat!(env!("OUT_DIR"), "/demo.impl.rs"));
}
