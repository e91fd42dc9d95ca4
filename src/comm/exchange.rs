//! Collective exchanges built on point-to-point messages.
//!
//! Every helper follows the same two-stage protocol: a [`WireHdr`] carrying
//! the record count goes to *every* peer, then payloads go only where the
//! count is non-zero. All send and receive handles are drained before returning,
//! even if an error occurs, so a failing rank never strands its peers mid-exchange.

use std::collections::BTreeMap;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

use crate::comm::communicator::{CommTag, Communicator, Wait};
use crate::comm::wire::{WIRE_VERSION, WireHdr, WireIndex, kind};
use crate::mpc_error::MpcError;

fn decode<T: Pod>(raw: &[u8], count: usize) -> Vec<T> {
    let mut out = vec![T::zeroed(); count];
    bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(raw);
    out
}

/// Sparse all-to-all: `outgoing[r]` is delivered to rank `r`; the result maps
/// each sending rank to what it sent us. Ranks that sent nothing are absent.
///
/// `op` identifies the collective; peers that entered a different collective
/// are reported as [`MpcError::CollectiveMismatch`].
pub fn all_to_all_v<T, C>(
    comm: &C,
    tag: CommTag,
    op: u16,
    outgoing: &BTreeMap<usize, Vec<T>>,
) -> Result<BTreeMap<usize, Vec<T>>, MpcError>
where
    T: Pod,
    C: Communicator,
{
    let me = comm.rank();
    let size = comm.size();
    if let Some((&bad, _)) = outgoing.iter().find(|(r, _)| **r >= size) {
        return Err(MpcError::IndexOutOfRange {
            context: "all_to_all_v destination rank",
            index: bad as u64,
            len: size as u64,
        });
    }

    let mut incoming = BTreeMap::new();
    if let Some(own) = outgoing.get(&me) {
        if !own.is_empty() {
            incoming.insert(me, own.clone());
        }
    }
    if size == 1 {
        return Ok(incoming);
    }

    // 1) headers: post all receives, then all sends
    let hdr_tag = tag.as_u16();
    let mut hdr_recvs = Vec::with_capacity(size - 1);
    for peer in (0..size).filter(|&p| p != me) {
        let mut buf = [0u8; size_of::<WireHdr>()];
        hdr_recvs.push((peer, comm.irecv(peer, hdr_tag, &mut buf)));
    }
    let mut pending_sends = Vec::with_capacity(2 * (size - 1));
    for peer in (0..size).filter(|&p| p != me) {
        let count = outgoing.get(&peer).map_or(0, Vec::len);
        let hdr = WireHdr::new(op, count);
        pending_sends.push(comm.isend(peer, hdr_tag, bytemuck::bytes_of(&hdr)));
    }

    // 2) collect counts (but do not early-return)
    let mut counts = BTreeMap::new();
    let mut maybe_err = None;
    for (peer, h) in hdr_recvs {
        match h.wait() {
            Some(data) if data.len() == size_of::<WireHdr>() => {
                let hdr: WireHdr = decode::<WireHdr>(&data, 1)[0];
                if (hdr.kind() != op || hdr.version() != WIRE_VERSION) && maybe_err.is_none() {
                    maybe_err = Some(MpcError::CollectiveMismatch {
                        operation: "all_to_all_v",
                        rank: me,
                        detail: format!(
                            "expected op {op} v{WIRE_VERSION} from rank {peer}, got op {} v{}",
                            hdr.kind(),
                            hdr.version()
                        ),
                    });
                }
                if hdr.count() > 0 {
                    counts.insert(peer, hdr.count());
                }
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(MpcError::CommError {
                    neighbor: peer,
                    reason: format!(
                        "expected {} header bytes, got {}",
                        size_of::<WireHdr>(),
                        data.len()
                    ),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MpcError::CommError {
                    neighbor: peer,
                    reason: format!("failed to receive header from rank {peer}"),
                });
            }
            _ => {} // already have an error; just drain
        }
    }

    // 3) payloads
    let data_tag = tag.offset(1).as_u16();
    let mut data_recvs = Vec::with_capacity(counts.len());
    for (&peer, &count) in &counts {
        let mut buf = vec![0u8; count * size_of::<T>()];
        data_recvs.push((peer, count, comm.irecv(peer, data_tag, &mut buf)));
    }
    for (&peer, items) in outgoing.iter().filter(|(p, v)| **p != me && !v.is_empty()) {
        pending_sends.push(comm.isend(peer, data_tag, bytemuck::cast_slice(items)));
    }
    for (peer, count, h) in data_recvs {
        match h.wait() {
            Some(data) if data.len() == count * size_of::<T>() => {
                incoming.insert(peer, decode::<T>(&data, count));
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(MpcError::CommError {
                    neighbor: peer,
                    reason: format!(
                        "expected {} payload bytes, got {}",
                        count * size_of::<T>(),
                        data.len()
                    ),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MpcError::CommError {
                    neighbor: peer,
                    reason: format!("failed to receive payload from rank {peer}"),
                });
            }
            _ => {}
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(incoming),
    }
}

/// Every rank contributes `local`; the result is indexed by rank.
pub fn all_gather<T, C>(comm: &C, tag: CommTag, local: &[T]) -> Result<Vec<Vec<T>>, MpcError>
where
    T: Pod,
    C: Communicator,
{
    let outgoing: BTreeMap<usize, Vec<T>> =
        (0..comm.size()).map(|r| (r, local.to_vec())).collect();
    let mut incoming = all_to_all_v(comm, tag, kind::GATHER, &outgoing)?;
    Ok((0..comm.size())
        .map(|r| incoming.remove(&r).unwrap_or_default())
        .collect())
}

/// Agree on the outcome of a step that every rank executed.
///
/// A local error is returned as-is; if this rank succeeded but some other rank
/// failed, the result is [`MpcError::CollectiveMismatch`] naming the first
/// failing rank. Every rank takes part in the flag exchange, so all ranks unwind
/// together.
pub fn collective_check<T, C>(
    comm: &C,
    tag: CommTag,
    operation: &'static str,
    local: Result<T, MpcError>,
) -> Result<T, MpcError>
where
    C: Communicator,
{
    let flag = WireIndex::of(u64::from(local.is_err()));
    let outgoing: BTreeMap<usize, Vec<WireIndex>> =
        (0..comm.size()).map(|r| (r, vec![flag])).collect();
    let flags = all_to_all_v(comm, tag, kind::FLAGS, &outgoing)?;
    let value = local?;
    let failed = flags
        .iter()
        .find(|(_, f)| f.first().is_some_and(|f| f.get() != 0))
        .map(|(&r, _)| r);
    match failed {
        Some(rank) => {
            log::warn!("[{operation}] rank {rank} failed; unwinding on rank {}", comm.rank());
            Err(MpcError::CollectiveMismatch {
                operation,
                rank: comm.rank(),
                detail: format!("rank {rank} reported an error"),
            })
        }
        None => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::{NoComm, RayonComm};
    use crate::comm::wire::WireIndex;
    use serial_test::serial;

    #[test]
    fn serial_all_to_all_keeps_self_message() {
        let mut out = BTreeMap::new();
        out.insert(0usize, vec![WireIndex::of(5)]);
        let got = all_to_all_v(&NoComm, CommTag::new(1), kind::GATHER, &out).unwrap();
        assert_eq!(got[&0][0].get(), 5);
    }

    #[test]
    #[serial]
    fn three_rank_sparse_exchange() {
        let world = RayonComm::world(3);
        let handles: Vec<_> = world
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let me = comm.rank() as u64;
                    // rank r sends `r` to (r + 1) % 3 only
                    let mut out = BTreeMap::new();
                    out.insert((comm.rank() + 1) % 3, vec![WireIndex::of(me), WireIndex::of(me)]);
                    let got = all_to_all_v(&comm, CommTag::new(0x40), kind::GATHER, &out).unwrap();
                    (comm.rank(), got)
                })
            })
            .collect();
        for h in handles {
            let (rank, got) = h.join().unwrap();
            let from = (rank + 2) % 3;
            assert_eq!(got.len(), 1);
            let vals: Vec<u64> = got[&from].iter().map(WireIndex::get).collect();
            assert_eq!(vals, vec![from as u64, from as u64]);
        }
    }

    #[test]
    #[serial]
    fn collective_check_propagates_remote_failure() {
        let world = RayonComm::world(2);
        let handles: Vec<_> = world
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let local = if comm.rank() == 1 {
                        Err(MpcError::SingularSystem)
                    } else {
                        Ok(())
                    };
                    collective_check(&comm, CommTag::new(0x50), "test", local)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(matches!(
            results[0],
            Err(MpcError::CollectiveMismatch { operation: "test", .. })
        ));
        assert_eq!(results[1], Err(MpcError::SingularSystem));
    }
}
