//! Ack/seq-keyed correlation of request and response flows.
//!
//! A flow is one direction of one HTTP exchange, keyed by the TCP ack
//! value its sender carries while the peer stays silent. Message buffers
//! are owned by exactly one table (`flows`, by canonical ack); every other
//! table holds plain ack values and goes through a single level of alias
//! indirection:
//!
//! - `ack_aliases`:   alias ack → canonical ack of the same flow
//! - `seq_with_data`: request `seq + payload_len` → the request flow it
//!   came from. A response whose ack equals such a key answers that
//!   request, and a request segment whose *seq* equals such a key
//!   continues that flow under a new ack (body after a 100 Continue).
//! - `resp_aliases`:  response canonical ack → request canonical ack, so
//!   a second response ack for the same exchange folds into the first.
//! - `orphans`:       response flows whose request has not been seen yet.
//!
//! All timestamps are capture-clock seconds supplied by the caller; the
//! expiration sweep is the only source of time.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::http::{self, Completeness};
use crate::message::{CapturedMessage, MessageBuffer};
use crate::protocol::{Direction, PacketRecord};

/// What a response needs to know about a request flow. Kept in
/// `seq_with_data` past the request's own emission, since the response
/// usually arrives after the request has already been handed to the sink.
#[derive(Debug, Clone, Copy)]
struct RequestRef {
    ack: u32,
    id: Uuid,
    bodyless: bool,
    last_seen: f64,
}

#[derive(Debug, Default)]
pub struct Correlator {
    expiration: f64,
    flows: HashMap<u32, MessageBuffer>,
    ack_aliases: HashMap<u32, u32>,
    seq_with_data: HashMap<u32, RequestRef>,
    resp_aliases: HashMap<u32, u32>,
    orphans: HashSet<u32>,
}

impl Correlator {
    pub fn new(expiration: f64) -> Self {
        Correlator {
            expiration,
            ..Default::default()
        }
    }

    /// Number of live message buffers.
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// True when every table has been drained; holds after all exchanges
    /// have been emitted and the sweep has passed.
    pub fn is_idle(&self) -> bool {
        self.flows.is_empty()
            && self.ack_aliases.is_empty()
            && self.seq_with_data.is_empty()
            && self.resp_aliases.is_empty()
            && self.orphans.is_empty()
    }

    /// Feed one decoded segment; returns any messages completed by it, a
    /// paired request always ahead of its response.
    pub fn process_packet(&mut self, ts: f64, pkt: &PacketRecord) -> Vec<CapturedMessage> {
        let mut out = Vec::new();
        if !pkt.payload.is_empty() {
            match pkt.direction {
                Direction::Incoming => self.process_request(ts, pkt, &mut out),
                Direction::Outgoing => self.process_response(ts, pkt, &mut out),
            }
        }
        // Empty segments carry no bytes to reassemble but a FIN or RST
        // still closes the flow.
        if pkt.flags.fin || pkt.flags.rst {
            self.close_flow(pkt, &mut out);
        }
        out
    }

    /// Emit everything older than the expiration interval (truncated where
    /// framing was never satisfied) and drop stale index entries.
    pub fn expire(&mut self, now: f64) -> Vec<CapturedMessage> {
        let mut out = Vec::new();
        let expired: Vec<u32> = self
            .flows
            .iter()
            .filter(|(_, buf)| now - buf.created_at > self.expiration)
            .map(|(&canon, _)| canon)
            .collect();

        for canon in expired {
            let Some(buf) = self.flows.remove(&canon) else {
                continue;
            };
            self.cleanup_indices(canon);
            if buf.is_empty() {
                continue;
            }
            match buf.inspect().status {
                Completeness::Preamble => {
                    tracing::trace!(ack = canon, "dropping unanswered 100-continue preamble");
                }
                Completeness::Complete | Completeness::UntilClose => {
                    out.push(buf.into_message(false));
                }
                Completeness::Incomplete => {
                    out.push(buf.into_message(true));
                }
            }
        }

        self.seq_with_data
            .retain(|_, r| now - r.last_seen <= self.expiration);
        out
    }

    /// Shutdown: flush every buffer as if it had just expired.
    pub fn flush(&mut self) -> Vec<CapturedMessage> {
        self.expire(f64::INFINITY)
    }

    fn resolve(&self, ack: u32) -> u32 {
        self.ack_aliases.get(&ack).copied().unwrap_or(ack)
    }

    fn process_request(&mut self, ts: f64, pkt: &PacketRecord, out: &mut Vec<CapturedMessage>) {
        // A request segment whose seq equals a recorded seq-end continues
        // that flow: the client moved to a new ack because the server sent
        // something (a 100 Continue) in between.
        if let Some(parent) = self.seq_with_data.get(&pkt.seq).map(|r| r.ack) {
            let canon = self.resolve(pkt.ack);
            if canon != parent {
                self.ack_aliases.insert(pkt.ack, parent);
                if let Some(stray) = self.flows.remove(&canon) {
                    if stray.direction == Direction::Incoming {
                        // Body packets were accumulating under the new ack
                        // before the link was known.
                        self.absorb_request_flow(parent, canon, stray);
                    } else {
                        self.flows.insert(canon, stray);
                        self.ack_aliases.remove(&pkt.ack);
                    }
                }
            }
        }

        let canon = self.resolve(pkt.ack);
        if let Some(buf) = self.flows.get(&canon) {
            if buf.direction != Direction::Incoming {
                tracing::trace!(ack = canon, "request segment collides with a response flow");
                return;
            }
        }

        let buf = self
            .flows
            .entry(canon)
            .or_insert_with(|| MessageBuffer::new(ts, Direction::Incoming, pkt.peer_addr(), canon));
        buf.add(pkt.seq, &pkt.payload);
        buf.note_ack(pkt.ack);

        let id = buf.id;
        let bodyless = http::request_has_no_body(&buf.assembled());
        let seq_end = pkt.seq_end();
        let buffer_end = buf.end_seq();
        self.seq_with_data.insert(
            seq_end,
            RequestRef {
                ack: canon,
                id,
                bodyless,
                last_seen: ts,
            },
        );
        // Headers arriving by prepend change what the entry at the buffer
        // end should say about the body.
        if buffer_end != seq_end {
            if let Some(r) = self.seq_with_data.get_mut(&buffer_end) {
                if r.ack == canon {
                    r.bodyless = bodyless;
                    r.last_seen = ts;
                }
            }
        }

        // An incoming flow that starts exactly where this packet ends is
        // this flow's continuation, accumulated before the link was known.
        if let Some(child) = self.find_continuation(canon, seq_end) {
            if let Some(stray) = self.flows.remove(&child) {
                self.absorb_request_flow(canon, child, stray);
            }
        }
        let final_end = self.flows.get(&canon).map(|b| b.end_seq());

        self.try_complete(canon, out);

        // A parked response may have been waiting on this request.
        if let Some(end) = final_end {
            self.adopt_orphan(end, out);
            if end != seq_end {
                self.adopt_orphan(seq_end, out);
            }
        }
    }

    fn process_response(&mut self, ts: f64, pkt: &PacketRecord, out: &mut Vec<CapturedMessage>) {
        let canon = self.resolve(pkt.ack);

        if let Some(buf) = self.flows.get_mut(&canon) {
            if buf.direction != Direction::Outgoing {
                tracing::trace!(ack = canon, "response segment collides with a request flow");
                return;
            }
            buf.add(pkt.seq, &pkt.payload);
            buf.note_ack(pkt.ack);
            self.try_complete(canon, out);
            return;
        }

        // First packet of a response flow: bind it to its request via the
        // recorded seq-end, or park it as an orphan.
        if let Some(req) = self.seq_with_data.get(&canon).copied() {
            // The same exchange may already have a response flow (the 100
            // Continue preamble arrived on the pre-body ack); fold this
            // ack into it.
            if let Some(existing) = self.response_flow_for(req.ack) {
                self.seq_with_data.remove(&canon);
                self.ack_aliases.insert(pkt.ack, existing);
                if let Some(buf) = self.flows.get_mut(&existing) {
                    buf.add(pkt.seq, &pkt.payload);
                    buf.note_ack(pkt.ack);
                }
                self.try_complete(existing, out);
                return;
            }

            let mut buf = MessageBuffer::new(ts, Direction::Outgoing, pkt.peer_addr(), canon);
            buf.id = req.id;
            buf.response_to_bodyless = req.bodyless;
            buf.add(pkt.seq, &pkt.payload);
            // A 100 Continue acks the request headers; the request's body
            // packets still need the seq link to find their flow, so the
            // entry is only consumed by a real response.
            let preamble = http::is_continue_preamble(&buf.assembled());
            self.flows.insert(canon, buf);
            self.resp_aliases.insert(canon, req.ack);
            if !preamble {
                self.seq_with_data.remove(&canon);
            }
            self.try_complete(canon, out);
        } else {
            let mut buf = MessageBuffer::new(ts, Direction::Outgoing, pkt.peer_addr(), canon);
            buf.add(pkt.seq, &pkt.payload);
            self.flows.insert(canon, buf);
            self.orphans.insert(canon);
        }
    }

    /// FIN or RST for one direction: mark the flow terminal, which may
    /// complete a response that runs until close.
    fn close_flow(&mut self, pkt: &PacketRecord, out: &mut Vec<CapturedMessage>) {
        let canon = self.resolve(pkt.ack);
        if let Some(buf) = self.flows.get_mut(&canon) {
            if buf.direction == pkt.direction {
                buf.closed = true;
                self.try_complete(canon, out);
            }
        }
    }

    /// The canonical ack of the response flow already paired with the
    /// given request flow, if any.
    fn response_flow_for(&self, req_ack: u32) -> Option<u32> {
        self.resp_aliases
            .iter()
            .find(|&(resp, &req)| req == req_ack && self.flows.contains_key(resp))
            .map(|(&resp, _)| resp)
    }

    /// An incoming flow other than `canon` whose first byte sits at
    /// `seq_end`: the tail half of a two-phase request.
    fn find_continuation(&self, canon: u32, seq_end: u32) -> Option<u32> {
        self.flows
            .iter()
            .find(|&(&key, buf)| {
                key != canon
                    && buf.direction == Direction::Incoming
                    && !buf.is_empty()
                    && buf.start_seq() == seq_end
            })
            .map(|(&key, _)| key)
    }

    /// Fold a stray request flow (already removed from `flows`) into the
    /// flow keyed `parent`, rewriting every index entry that pointed at it.
    fn absorb_request_flow(&mut self, parent: u32, child_key: u32, child: MessageBuffer) {
        let (parent_id, end, bodyless) = match self.flows.get_mut(&parent) {
            Some(parent_buf) => {
                for (seq, data) in child.segments() {
                    parent_buf.add(seq, data);
                }
                for &ack in &child.associated_acks {
                    parent_buf.note_ack(ack);
                }
                parent_buf.note_ack(child_key);
                (
                    parent_buf.id,
                    parent_buf.end_seq(),
                    http::request_has_no_body(&parent_buf.assembled()),
                )
            }
            None => {
                // Parent already emitted; keep the bytes in one place so
                // later segments still land together.
                self.ack_aliases.insert(child_key, parent);
                self.flows.insert(parent, child);
                return;
            }
        };

        self.ack_aliases.insert(child_key, parent);
        for &ack in &child.associated_acks {
            self.ack_aliases.insert(ack, parent);
        }
        self.ack_aliases.remove(&parent);
        for alias in self.ack_aliases.values_mut() {
            if *alias == child_key {
                *alias = parent;
            }
        }

        for r in self.seq_with_data.values_mut() {
            if r.ack == child_key {
                r.ack = parent;
                r.id = parent_id;
            }
        }
        if let Some(r) = self.seq_with_data.get_mut(&end) {
            if r.ack == parent {
                r.bodyless = bodyless;
            }
        }

        // A response adopted under the child's identity follows it.
        let resp_keys: Vec<u32> = self
            .resp_aliases
            .iter()
            .filter(|&(_, &req)| req == child_key)
            .map(|(&resp, _)| resp)
            .collect();
        for resp in resp_keys {
            self.resp_aliases.insert(resp, parent);
            if let Some(buf) = self.flows.get_mut(&resp) {
                buf.id = parent_id;
                buf.response_to_bodyless = bodyless;
            }
        }
    }

    /// Hand a parked response to the request whose seq-end matches its ack.
    fn adopt_orphan(&mut self, key: u32, out: &mut Vec<CapturedMessage>) {
        if !self.orphans.contains(&key) {
            return;
        }
        let Some(req) = self.seq_with_data.get(&key).copied() else {
            return;
        };
        let Some(buf) = self.flows.get_mut(&key) else {
            self.orphans.remove(&key);
            return;
        };
        buf.id = req.id;
        buf.response_to_bodyless = req.bodyless;
        let preamble = http::is_continue_preamble(&buf.assembled());
        self.orphans.remove(&key);
        self.resp_aliases.insert(key, req.ack);
        if !preamble {
            self.seq_with_data.remove(&key);
        }
        self.try_complete(key, out);
    }

    /// Emit the flow if the boundary detector says it is done. Orphans
    /// wait for adoption or expiration regardless.
    fn try_complete(&mut self, canon: u32, out: &mut Vec<CapturedMessage>) {
        if self.orphans.contains(&canon) {
            return;
        }
        let Some(buf) = self.flows.get(&canon) else {
            return;
        };
        let verdict = buf.inspect();
        let closed = buf.closed;
        if let Some(buf) = self.flows.get_mut(&canon) {
            buf.body_mode = verdict.mode;
        }
        match verdict.status {
            Completeness::Complete => self.emit(canon, out),
            Completeness::UntilClose if closed => self.emit(canon, out),
            _ => {}
        }
    }

    fn emit(&mut self, canon: u32, out: &mut Vec<CapturedMessage>) {
        if let Some(buf) = self.flows.remove(&canon) {
            self.cleanup_indices(canon);
            out.push(buf.into_message(false));
        }
    }

    /// Drop the index entries owned by a removed flow. `seq_with_data`
    /// deliberately survives a request's emission and is swept by age.
    fn cleanup_indices(&mut self, canon: u32) {
        self.ack_aliases.retain(|_, c| *c != canon);
        self.resp_aliases.remove(&canon);
        self.orphans.remove(&canon);
    }
}
