//! # Dispatcher Module
//!
//! The dispatcher drives the two-stage request pipeline. Given a parsed
//! request and a context key, it:
//!
//! 1. Registers the request/response objects in the context store and binds
//!    the scoped cleanup guard (so the entries are reclaimed on every exit
//!    path, including panic unwind).
//! 2. Resolves the URI through the router; no mapping is a 404.
//! 3. Merges query, form-encoded body, and raw-JSON body into one input map.
//!    The merge is left-biased: a later source never overwrites a key an
//!    earlier source already set.
//! 4. Runs the handler's form (validation) unit, if one is registered and
//!    exposes the routed method. The form may transform the input or reject
//!    it; rejection short-circuits before the handler stage.
//! 5. Invokes the routed method on the controller and converts its result
//!    into a reply: structured values serialize as JSON, strings are written
//!    raw, an empty result flushes whatever the handler buffered directly.
//!
//! Faults at any stage are caught here and mapped to status codes; in debug
//! mode the reply is a 200 carrying the message and a trace so an operator
//! can see what happened from the browser.
//!
//! Controllers and forms are looked up in registration tables filled at
//! startup; handler identity never derives from runtime string surgery.

mod core;

pub use core::{
    merge_request_data, Body, Controller, ControllerRequest, DispatchReply, Dispatcher,
    FormValidator, HeaderVec, InputMap, MAX_INLINE_HEADERS,
};
