//! Requests sent to the X server, and the bookkeeping to match replies to them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Wm;
use super::error::WmError;
use crate::common::collections::HashMap;
use crate::model::WindowId;

/// Opaque tag the transport hands back with each reply.
///
/// Tokens are allocated sequentially, so a replayed session hands out the
/// same ones as the recorded one did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestToken(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    /// Select structure and property change events on a window.
    Subscribe,
    QueryChildren,
    GetWmState,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestKind::Subscribe => "subscribe",
            RequestKind::QueryChildren => "query children",
            RequestKind::GetWmState => "get WM_STATE",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub token: RequestToken,
    pub kind: RequestKind,
    pub window: WindowId,
}

/// Whatever carries requests to the X server.
///
/// Sending must not block. Replies come back later through
/// [`Wm::reply_subscribe`] and friends, tagged with the token given here.
/// Replies concerning the same window must come back in the order the
/// requests were made.
pub trait Transport {
    fn send(&mut self, request: Request);
}

impl Transport for Vec<Request> {
    fn send(&mut self, request: Request) { self.push(request) }
}

/// Adapts a closure into a [`Transport`].
pub struct CallbackTransport<F>(pub F);

impl<F: FnMut(Request)> Transport for CallbackTransport<F> {
    fn send(&mut self, request: Request) { (self.0)(request) }
}

pub(crate) type OnSubscribed<W> = Box<dyn FnOnce(&mut Wm<W>, &mut dyn Transport, bool)>;
pub(crate) type OnChildren<W> = Box<dyn FnOnce(&mut Wm<W>, &mut dyn Transport, Option<Vec<WindowId>>)>;
pub(crate) type OnWmState<W> = Box<dyn FnOnce(&mut Wm<W>, &mut dyn Transport, Option<bool>)>;

/// What to do once a reply arrives.
pub(crate) enum Continuation<W> {
    Subscribe(OnSubscribed<W>),
    QueryChildren(OnChildren<W>),
    GetWmState(OnWmState<W>),
}

impl<W> Continuation<W> {
    fn kind(&self) -> RequestKind {
        match self {
            Continuation::Subscribe(_) => RequestKind::Subscribe,
            Continuation::QueryChildren(_) => RequestKind::QueryChildren,
            Continuation::GetWmState(_) => RequestKind::GetWmState,
        }
    }
}

pub(crate) struct PendingRequests<W> {
    next_token: u64,
    pending: HashMap<RequestToken, Continuation<W>>,
}

impl<W> PendingRequests<W> {
    pub(crate) fn new() -> Self {
        PendingRequests {
            next_token: 1,
            pending: HashMap::default(),
        }
    }

    pub(crate) fn len(&self) -> usize { self.pending.len() }

    /// Stores the continuation and sends the request it belongs to.
    pub(crate) fn send(
        &mut self,
        conn: &mut dyn Transport,
        window: WindowId,
        continuation: Continuation<W>,
    ) -> RequestToken {
        let token = RequestToken(self.next_token);
        self.next_token += 1;
        let kind = continuation.kind();
        self.pending.insert(token, continuation);
        conn.send(Request { token, kind, window });
        token
    }

    /// Removes the continuation waiting for `token`.
    ///
    /// A reply of the wrong kind leaves the continuation in place.
    pub(crate) fn take(&mut self, token: RequestToken, got: RequestKind) -> Result<Continuation<W>, WmError> {
        let continuation = self.pending.remove(&token).ok_or(WmError::UnknownRequest(token))?;
        let expected = continuation.kind();
        if expected != got {
            self.pending.insert(token, continuation);
            return Err(WmError::ReplyMismatch { token, expected, got });
        }
        Ok(continuation)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn subscribed() -> Continuation<()> {
        Continuation::Subscribe(Box::new(|_: &mut Wm, _: &mut dyn Transport, _: bool| {}))
    }

    fn children() -> Continuation<()> {
        Continuation::QueryChildren(Box::new(|_: &mut Wm, _: &mut dyn Transport, _: Option<Vec<WindowId>>| {}))
    }

    fn wm_state() -> Continuation<()> {
        Continuation::GetWmState(Box::new(|_: &mut Wm, _: &mut dyn Transport, _: Option<bool>| {}))
    }

    #[test]
    fn tokens_are_sequential_and_forwarded() {
        let mut conn = Vec::new();
        let mut pending = PendingRequests::<()>::new();
        let a = pending.send(&mut conn, 5, subscribed());
        let b = pending.send(&mut conn, 6, wm_state());
        assert_eq!((RequestToken(1), RequestToken(2)), (a, b));
        assert_eq!(
            vec![
                Request { token: a, kind: RequestKind::Subscribe, window: 5 },
                Request { token: b, kind: RequestKind::GetWmState, window: 6 },
            ],
            conn
        );
        assert_eq!(2, pending.len());
    }

    #[test]
    fn replies_are_matched_by_token_and_kind() {
        let mut conn = Vec::new();
        let mut pending = PendingRequests::<()>::new();
        let token = pending.send(&mut conn, 5, children());

        let err = pending.take(token, RequestKind::GetWmState).err();
        assert_eq!(
            Some(WmError::ReplyMismatch {
                token,
                expected: RequestKind::QueryChildren,
                got: RequestKind::GetWmState,
            }),
            err
        );
        assert!(pending.take(token, RequestKind::QueryChildren).is_ok());
        assert_eq!(
            Some(WmError::UnknownRequest(token)),
            pending.take(token, RequestKind::QueryChildren).err()
        );
        assert_eq!(0, pending.len());
    }

    #[test]
    fn callback_transport_forwards_requests() {
        let mut seen = Vec::new();
        let mut conn = CallbackTransport(|request: Request| seen.push(request.window));
        let mut pending = PendingRequests::<()>::new();
        pending.send(&mut conn, 9, subscribed());
        assert_eq!(vec![9], seen);
    }
}
