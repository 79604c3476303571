use std::{collections::VecDeque, time::Duration};

use alloy::{
    eips::BlockNumberOrTag,
    primitives::U256,
    providers::Provider,
    rpc::types::{Filter, Log},
    sol_types::SolEvent,
};
use futures::{Stream, stream};
use tracing::{debug, warn};

use crate::{
    Chain,
    abi::exchange::OrderFilled,
    error::{Error, Result},
    types::{Cursor, Fill, FillBatch, Side, StreamMessage, Timestamp},
};

/// Number of most recent emitted blocks kept to detect reorgs.
const DEFAULT_REORG_DEPTH: usize = 128;

/// Returns stream of exchange fills batched per block, starting from the
/// specified block.
///
/// Polls blocks one by one via the given [`Provider`], waiting for the
/// [`Provider`]-configured interval when the next block does not exist yet.
/// Logs are queried by block hash so every batch is consistent with the
/// header it was produced from.
///
/// A block whose parent hash does not match the previously emitted block
/// means the chain reorganized: the previous block is reported in a
/// [`StreamMessage::Rollback`] and fetched again, repeating until the
/// chains connect.
///
/// It is recommended to setup provider with
/// [`alloy::transports::layers::RetryBackoffLayer`], as any RPC failure is
/// passed on to the stream.
pub fn fills<P, S, SFut>(
    chain: &Chain,
    provider: P,
    from: u64,
    sleep: S,
) -> impl Stream<Item = Result<StreamMessage>>
where
    P: Provider,
    S: Fn(Duration) -> SFut + Copy,
    SFut: Future<Output = ()>,
{
    let exchanges = chain.exchanges().to_vec();
    stream::unfold(
        (provider, from, VecDeque::<Cursor>::new()),
        move |(provider, mut block_num, mut emitted)| {
            let exchanges = exchanges.clone();
            async move {
                loop {
                    let block = match provider
                        .get_block_by_number(BlockNumberOrTag::Number(block_num))
                        .await
                    {
                        Ok(Some(block)) => block,
                        Ok(None) => {
                            // Block is not available yet
                            sleep(provider.client().poll_interval()).await;
                            continue;
                        }
                        Err(e) => return Some((Err(e.into()), (provider, block_num, emitted))),
                    };

                    let header = &block.header;
                    if let Some(prev) = emitted.back().copied() {
                        if prev.number() + 1 == block_num
                            && prev.hash() != Some(header.parent_hash)
                        {
                            warn!(
                                block = prev.number(),
                                parent_hash = %header.parent_hash,
                                "Block no longer canonical"
                            );
                            emitted.pop_back();
                            return Some((
                                Ok(StreamMessage::Rollback(vec![prev])),
                                (provider, prev.number(), emitted),
                            ));
                        }
                    }

                    let filter = Filter::new()
                        .address(exchanges.clone())
                        .at_block_hash(header.hash)
                        .event_signature(OrderFilled::SIGNATURE_HASH);
                    let logs = match provider.get_logs(&filter).await {
                        Ok(logs) => logs,
                        Err(e) => return Some((Err(e.into()), (provider, block_num, emitted))),
                    };

                    let timestamp = header.timestamp;
                    let fills = match logs
                        .iter()
                        .map(|log| decode_fill(log, block_num, timestamp))
                        .collect::<Result<Vec<_>>>()
                    {
                        Ok(fills) => fills,
                        Err(e) => return Some((Err(e), (provider, block_num, emitted))),
                    };

                    let cursor = Cursor::new(block_num, Some(header.hash), Some(timestamp));
                    debug!(block = block_num, fills = fills.len(), "Block fetched");
                    emitted.push_back(cursor);
                    if emitted.len() > DEFAULT_REORG_DEPTH {
                        emitted.pop_front();
                    }

                    let batch = FillBatch {
                        cursor,
                        header_timestamp: Some(timestamp),
                        fills,
                    };
                    return Some((
                        Ok(StreamMessage::Batch(batch)),
                        (provider, block_num + 1, emitted),
                    ));
                }
            }
        },
    )
}

fn decode_fill(log: &Log, block_number: u64, timestamp: Timestamp) -> Result<Fill> {
    let event = OrderFilled::decode_log(&log.inner)?.data;
    fill_from_event(&event, log, block_number, timestamp)
}

/// Converts an `OrderFilled` event into a [`Fill`] of the order maker.
///
/// A maker giving asset 0 (USDC) buys the outcome token received, otherwise
/// the maker sells the outcome token given.
pub fn fill_from_event(
    event: &OrderFilled,
    log: &Log,
    block_number: u64,
    timestamp: Timestamp,
) -> Result<Fill> {
    let (side, asset_id, usdc, shares) = if event.makerAssetId.is_zero() {
        (
            Side::Buy,
            event.takerAssetId,
            event.makerAmountFilled,
            event.takerAmountFilled,
        )
    } else {
        (
            Side::Sell,
            event.makerAssetId,
            event.takerAmountFilled,
            event.makerAmountFilled,
        )
    };

    Ok(Fill {
        trader: event.maker,
        asset_id,
        side,
        usdc: to_amount(usdc, "usdc")?,
        shares: to_amount(shares, "shares")?,
        timestamp,
        block_number,
        tx_hash: log.transaction_hash.unwrap_or_default(),
        tx_index: log.transaction_index.unwrap_or_default(),
        log_index: log.log_index.unwrap_or_default(),
    })
}

fn to_amount(value: U256, name: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::Decode(format!("{name} amount out of range: {value}")))
}
