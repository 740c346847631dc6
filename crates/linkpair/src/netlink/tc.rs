//! Queueing discipline requests and option encoding for tbf and netem.

use std::sync::OnceLock;

use super::builder::MessageBuilder;
use super::connection::{Connection, ack_request, create_request};
use super::message::NlMsgType;
use super::messages::TcMessage;
use super::types::netem::{
    DEFAULT_LIMIT, TCA_NETEM_CORR, TCA_NETEM_CORRUPT, TCA_NETEM_JITTER64, TCA_NETEM_LATENCY64,
    TCA_NETEM_REORDER, TcNetemCorr, TcNetemCorrupt, TcNetemQopt, TcNetemReorder,
};
use super::types::tbf::{TCA_TBF_BURST, TCA_TBF_PARMS, TCA_TBF_RATE64, TcTbfQopt};
use super::types::{TcMsg, TcRateSpec, TcaAttr, linklayer};
use crate::error::Result;
use crate::qdisc::{Netem, Qdisc, QdiscKind, TokenBucket};

const PSCHED_PATH: &str = "/proc/net/psched";

/// Ticks per microsecond on kernels with a nanosecond psched clock.
const DEFAULT_TICK_IN_USEC: f64 = 15.625;

/// Latency allowance used to size the tbf queue, in microseconds.
const TBF_LATENCY_US: u64 = 50_000;

/// Parse the first three fields of /proc/net/psched into ticks per microsecond.
fn parse_psched(text: &str) -> Option<f64> {
    let mut fields = text
        .split_whitespace()
        .map(|f| u32::from_str_radix(f, 16).ok());
    let mut t2us = fields.next()??;
    let us2t = fields.next()??;
    let clock_res = fields.next()??;

    if us2t == 0 {
        return None;
    }
    if clock_res == 1_000_000_000 {
        t2us = us2t;
    }
    let clock_factor = clock_res as f64 / 1_000_000.0;
    Some(t2us as f64 / us2t as f64 * clock_factor)
}

/// Scheduler ticks per microsecond, read once from /proc/net/psched.
pub fn tick_in_usec() -> f64 {
    static TICK: OnceLock<f64> = OnceLock::new();
    *TICK.get_or_init(|| {
        std::fs::read_to_string(PSCHED_PATH)
            .ok()
            .and_then(|text| parse_psched(&text))
            .unwrap_or(DEFAULT_TICK_IN_USEC)
    })
}

fn time_to_ticks(us: f64) -> u32 {
    (us * tick_in_usec()).min(u32::MAX as f64) as u32
}

/// Ticks needed to transmit `size` bytes at `rate` bytes per second.
fn xmit_ticks(rate: u64, size: u32) -> u32 {
    if rate == 0 {
        return 0;
    }
    time_to_ticks(size as f64 * 1_000_000.0 / rate as f64)
}

/// Convert a percentage to the kernel's 32-bit probability scale.
pub fn percent_to_prob(percent: f32) -> u32 {
    if percent <= 0.0 {
        0
    } else if percent >= 100.0 {
        u32::MAX
    } else {
        ((percent as f64 / 100.0) * u32::MAX as f64) as u32
    }
}

fn write_tbf_options(builder: &mut MessageBuilder, tbf: &TokenBucket) {
    let rate = tbf.rate / 8;

    let qopt = TcTbfQopt {
        rate: TcRateSpec {
            linklayer: linklayer::ETHERNET,
            rate: rate.min(u32::MAX as u64) as u32,
            ..Default::default()
        },
        limit: (rate * TBF_LATENCY_US / 1_000_000 + tbf.burst as u64).min(u32::MAX as u64) as u32,
        buffer: xmit_ticks(rate, tbf.burst),
        mtu: xmit_ticks(rate, tbf.min_burst),
        ..Default::default()
    };

    builder.append_attr_struct(TCA_TBF_PARMS, &qopt);
    if rate > u32::MAX as u64 {
        builder.append_attr_u64(TCA_TBF_RATE64, rate);
    }
    builder.append_attr_u32(TCA_TBF_BURST, tbf.burst);
}

fn write_netem_options(builder: &mut MessageBuilder, netem: &Netem) {
    let reorder = percent_to_prob(netem.reorder_probability);

    // Reordering needs a non-zero gap to take effect.
    let gap = if reorder > 0 && netem.gap == 0 { 1 } else { netem.gap };

    let qopt = TcNetemQopt {
        latency: time_to_ticks(netem.latency as f64),
        limit: DEFAULT_LIMIT,
        loss: percent_to_prob(netem.loss),
        gap,
        duplicate: percent_to_prob(netem.duplicate),
        jitter: time_to_ticks(netem.jitter as f64),
    };
    builder.append(&qopt);

    let corr = TcNetemCorr {
        delay_corr: percent_to_prob(netem.delay_correlation),
        loss_corr: percent_to_prob(netem.loss_correlation),
        dup_corr: percent_to_prob(netem.duplicate_correlation),
    };
    if corr.delay_corr != 0 || corr.loss_corr != 0 || corr.dup_corr != 0 {
        builder.append_attr_struct(TCA_NETEM_CORR, &corr);
    }

    if reorder > 0 {
        builder.append_attr_struct(
            TCA_NETEM_REORDER,
            &TcNetemReorder {
                probability: reorder,
                correlation: percent_to_prob(netem.reorder_correlation),
            },
        );
    }

    let corrupt = percent_to_prob(netem.corrupt_probability);
    if corrupt > 0 {
        builder.append_attr_struct(
            TCA_NETEM_CORRUPT,
            &TcNetemCorrupt {
                probability: corrupt,
                correlation: percent_to_prob(netem.corrupt_correlation),
            },
        );
    }

    if netem.latency > 0 {
        builder.append_attr_i64(TCA_NETEM_LATENCY64, netem.latency as i64 * 1000);
    }
    if netem.jitter > 0 {
        builder.append_attr_i64(TCA_NETEM_JITTER64, netem.jitter as i64 * 1000);
    }
}

fn qdisc_message(qdisc: &Qdisc) -> MessageBuilder {
    let mut builder = create_request(NlMsgType::RTM_NEWQDISC);
    builder.append(
        &TcMsg::new()
            .with_ifindex(qdisc.link_index as i32)
            .with_handle(qdisc.handle)
            .with_parent(qdisc.parent),
    );
    builder.append_attr_str(TcaAttr::Kind as u16, qdisc.kind.name());

    let options = builder.nest_start(TcaAttr::Options as u16);
    match &qdisc.kind {
        QdiscKind::TokenBucket(tbf) => write_tbf_options(&mut builder, tbf),
        QdiscKind::Netem(netem) => write_netem_options(&mut builder, netem),
    }
    builder.nest_end(options);

    builder
}

impl Connection {
    /// Add a planned qdisc.
    pub async fn add_qdisc(&self, qdisc: &Qdisc) -> Result<()> {
        tracing::debug!(
            index = qdisc.link_index,
            kind = qdisc.kind.name(),
            handle = %crate::qdisc::handle::format(qdisc.handle),
            "RTM_NEWQDISC"
        );
        self.request_ack(qdisc_message(qdisc)).await
    }

    /// Delete the qdisc at `parent` with `handle` on link `index`.
    pub async fn del_qdisc_by_index(&self, index: u32, handle: u32, parent: u32) -> Result<()> {
        tracing::debug!(index, handle = %crate::qdisc::handle::format(handle), "RTM_DELQDISC");
        let mut builder = ack_request(NlMsgType::RTM_DELQDISC);
        builder.append(
            &TcMsg::new()
                .with_ifindex(index as i32)
                .with_handle(handle)
                .with_parent(parent),
        );
        self.request_ack(builder).await
    }

    /// Qdiscs attached to link `index`.
    pub async fn get_qdiscs_by_index(&self, index: u32) -> Result<Vec<TcMessage>> {
        let qdiscs: Vec<TcMessage> = self.dump_typed(NlMsgType::RTM_GETQDISC).await?;
        Ok(qdiscs.into_iter().filter(|q| q.ifindex() == index).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::AttrIter;
    use crate::netlink::message::NLMSG_HDRLEN;
    use crate::qdisc::{ROOT_QDISC_HANDLE, handle};
    use zerocopy::FromBytes;

    fn options_of(msg: &[u8]) -> Vec<u8> {
        let attrs = AttrIter::new(&msg[NLMSG_HDRLEN + std::mem::size_of::<TcMsg>()..]);
        attrs
            .into_iter()
            .find(|(kind, _)| *kind == TcaAttr::Options as u16)
            .map(|(_, data)| data.to_vec())
            .unwrap()
    }

    #[test]
    fn test_parse_psched() {
        // Nanosecond clock as reported by current kernels.
        assert_eq!(
            parse_psched("000003e8 00000040 000f4240 3b9aca00\n"),
            Some(15.625)
        );
        assert_eq!(parse_psched(""), None);
        assert_eq!(parse_psched("zz 1 1"), None);
    }

    #[test]
    fn test_percent_to_prob() {
        assert_eq!(percent_to_prob(0.0), 0);
        assert_eq!(percent_to_prob(-1.0), 0);
        assert_eq!(percent_to_prob(100.0), u32::MAX);
        assert_eq!(percent_to_prob(50.0), u32::MAX / 2);
    }

    #[test]
    fn test_tbf_options() {
        let qdisc = Qdisc {
            link_index: 3,
            handle: ROOT_QDISC_HANDLE,
            parent: handle::ROOT,
            kind: QdiscKind::TokenBucket(TokenBucket::for_rate(8_000_000)),
        };
        let msg = qdisc_message(&qdisc).finish();

        let tcm = TcMsg::from_bytes(&msg[NLMSG_HDRLEN..]).unwrap();
        assert_eq!(tcm.tcm_ifindex, 3);
        assert_eq!(tcm.tcm_handle, ROOT_QDISC_HANDLE);
        assert_eq!(tcm.tcm_parent, handle::ROOT);

        let options = options_of(&msg);
        let attrs: Vec<_> = AttrIter::new(&options).collect();
        assert_eq!(attrs.len(), 2);

        let (qopt, _) = TcTbfQopt::read_from_prefix(attrs[0].1).unwrap();
        // 8 Mbit/s is 1,000,000 bytes/s
        assert_eq!(qopt.rate.rate, 1_000_000);
        assert_eq!(qopt.rate.linklayer, linklayer::ETHERNET);
        assert_eq!(qopt.limit, 50_000 + 32_000);
        assert_eq!(attrs[1], (TCA_TBF_BURST, &32_000u32.to_ne_bytes()[..]));
    }

    #[test]
    fn test_tbf_rate64() {
        let qdisc = Qdisc {
            link_index: 1,
            handle: ROOT_QDISC_HANDLE,
            parent: handle::ROOT,
            kind: QdiscKind::TokenBucket(TokenBucket::for_rate(100_000_000_000)),
        };
        let options = options_of(&qdisc_message(&qdisc).finish());
        let attrs: Vec<_> = AttrIter::new(&options).collect();

        let (qopt, _) = TcTbfQopt::read_from_prefix(attrs[0].1).unwrap();
        assert_eq!(qopt.rate.rate, u32::MAX);
        assert_eq!(
            attrs[1],
            (TCA_TBF_RATE64, &12_500_000_000u64.to_ne_bytes()[..])
        );
    }

    #[test]
    fn test_netem_options() {
        let netem = Netem {
            latency: 10_000,
            loss: 5.0,
            loss_correlation: 25.0,
            reorder_probability: 10.0,
            ..Default::default()
        };
        let qdisc = Qdisc {
            link_index: 2,
            handle: ROOT_QDISC_HANDLE,
            parent: handle::ROOT,
            kind: QdiscKind::Netem(netem),
        };
        let options = options_of(&qdisc_message(&qdisc).finish());

        let (qopt, rest) = TcNetemQopt::read_from_prefix(&options).unwrap();
        assert_eq!(qopt.limit, DEFAULT_LIMIT);
        assert_eq!(qopt.loss, percent_to_prob(5.0));
        assert_eq!(qopt.gap, 1);
        assert_eq!(qopt.duplicate, 0);

        let attrs: Vec<_> = AttrIter::new(rest).collect();
        let kinds: Vec<u16> = attrs.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec![TCA_NETEM_CORR, TCA_NETEM_REORDER, TCA_NETEM_LATENCY64]);

        let (corr, _) = TcNetemCorr::read_from_prefix(attrs[0].1).unwrap();
        assert_eq!(corr.loss_corr, percent_to_prob(25.0));
        assert_eq!(attrs[2].1, &10_000_000i64.to_ne_bytes());
    }
}
