use crate::node::LogNode;
use crate::writer::WriterId;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Half-open node range `[start, end)` of one append unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UnitRef {
    pub writer: WriterId,
    pub start: u64,
    pub end: u64,
}

/// Split a log into complete units. A trailing unit without its end marker
/// is left out.
pub(crate) fn units(writer: WriterId, log: &[LogNode]) -> Vec<UnitRef> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, node) in log.iter().enumerate() {
        if node.end {
            let end = i as u64 + 1;
            out.push(UnitRef { writer, start, end });
            start = end;
        }
    }
    out
}

/// Order the units of `writers` topologically
///
/// A unit is ready once its writer's previous units are ordered and every
/// head it names is covered. Among ready units the smallest writer id goes
/// first, so any replica holding the same logs computes the same order.
pub(crate) fn linearize(
    logs: &BTreeMap<WriterId, Vec<LogNode>>,
    writers: &BTreeSet<WriterId>,
) -> Vec<UnitRef> {
    let mut pending: BTreeMap<WriterId, (Vec<UnitRef>, usize)> = writers
        .iter()
        .filter_map(|w| logs.get(w).map(|log| (*w, (units(*w, log), 0))))
        .collect();
    let mut ordered: HashMap<WriterId, u64> = HashMap::new();
    let mut out = Vec::new();

    loop {
        let next = pending.iter().find_map(|(writer, (units, i))| {
            let unit = units.get(*i)?;
            let heads = &logs.get(writer)?.get(unit.start as usize)?.heads;
            let ready = heads
                .iter()
                .all(|h| ordered.get(&h.writer).copied().unwrap_or(0) >= h.length);
            ready.then_some(*unit)
        });
        let Some(unit) = next else { break };

        if let Some((_, i)) = pending.get_mut(&unit.writer) {
            *i += 1;
        }
        _ = ordered.insert(unit.writer, unit.end);
        out.push(unit);
    }
    out
}
