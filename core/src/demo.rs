//! Checkout saga
//!
//! A small program written directly against the engine API, used by the
//! `choreo saga` command and the end-to-end tests:
//!
//! ```text
//! scope checkout {
//!     install PaymentDeclined => { log; compensate reserve; leave checkout }
//!     install compensation refund
//!     scope reserve { reserve stock; install compensation release }
//!     charge card            // raises PaymentDeclined when declined
//!     leave checkout         // merges compensations into the session scope
//! }
//! ```
//!
//! Every step appends to the `log` array in session data.

use serde_json::json;

use crate::continuation::{from_fn, ContinuationRef};
use crate::fault::Fault;

pub const CHECKOUT_SCOPE: &str = "checkout";
pub const RESERVE_SCOPE: &str = "reserve";
pub const PAYMENT_DECLINED: &str = "PaymentDeclined";

/// Build the checkout program. `decline` makes the payment step fail.
pub fn checkout(decline: bool) -> ContinuationRef {
    from_fn("checkout", move |ctx| {
        ctx.push_scope(CHECKOUT_SCOPE, None);
        ctx.install_fault_handler(PAYMENT_DECLINED, on_declined())
            .map_err(engine_fault)?;
        ctx.install_compensation(step("refund", "refund payment"))
            .map_err(engine_fault)?;
        ctx.execute_next([reserve_stock(), charge(decline), leave(true)]);
        Ok(())
    })
}

fn reserve_stock() -> ContinuationRef {
    from_fn("reserve_stock", |ctx| {
        ctx.push_scope(RESERVE_SCOPE, None);
        ctx.state().push("log", json!("reserve stock"));
        ctx.install_compensation(step("release_stock", "release stock"))
            .map_err(engine_fault)?;
        ctx.execute_next([leave(true)]);
        Ok(())
    })
}

fn charge(decline: bool) -> ContinuationRef {
    from_fn("charge", move |ctx| {
        if decline {
            return Err(Fault::new(PAYMENT_DECLINED).with_message("card declined"));
        }
        ctx.state().push("log", json!("charge card"));
        Ok(())
    })
}

fn on_declined() -> ContinuationRef {
    from_fn("on_declined", |ctx| {
        ctx.state().push("log", json!("payment declined"));
        let mut next = Vec::new();
        if let Some(compensation) = ctx.get_compensation(RESERVE_SCOPE).map_err(engine_fault)? {
            next.push(compensation);
        }
        // Checkout failed as a whole: its own compensation is not kept
        next.push(leave(false));
        ctx.execute_next(next);
        Ok(())
    })
}

fn leave(merge: bool) -> ContinuationRef {
    from_fn("leave_scope", move |ctx| {
        let scope = ctx.current_scope_id().map_err(engine_fault)?;
        ctx.pop_scope(merge, None).map_err(engine_fault)?;
        ctx.state().push("log", json!(format!("leave {}", scope)));
        Ok(())
    })
}

fn step(name: &'static str, entry: &'static str) -> ContinuationRef {
    from_fn(name, move |ctx| {
        ctx.if_not_killed(|| ctx.state().push("log", json!(entry)));
        Ok(())
    })
}

fn engine_fault(err: crate::error::EngineError) -> Fault {
    Fault::new("EngineError").with_message(err.to_string())
}
