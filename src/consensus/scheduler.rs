// This file is part of LATTICE.
//
// Copyright (C) 2022 Affidaty Spa.
//
// LATTICE is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// LATTICE is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with LATTICE. If not, see <https://www.gnu.org/licenses/>.

//! Consensus scheduler service.
//!
//! Translates the persisted round state into consensus commands and arms a
//! cancellable timer per command. A committed block event rearms the timer
//! before it fires; a fired timer sends a production trigger to the
//! blockchain service.

use crate::{
    base::{schema::ChainInfo, serialize::MessagePack, timestamp_millis},
    blockchain::{BlockRequestSender, BlockResponseReceiver, Event, Message},
    consensus::round::Round,
    Error, ErrorKind, Result,
};
use async_std::task;
use futures::{future, Future, FutureExt, StreamExt};
use std::{
    sync::Arc,
    task::{Context, Poll},
    thread::{self, JoinHandle},
    time::Duration,
};

/// Polling period used while the chain has no usable round yet and as grace
/// period after a rejected production trigger.
const RETRY_PERIOD_MS: u64 = 1000;

/// What the miner is asked to do when the command timer fires.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Copy)]
pub enum Behaviour {
    /// First-round production, no previous in value to reveal.
    #[serde(rename = "initial-slot")]
    InitialSlot,
    /// In-slot production publishing the mining data.
    #[serde(rename = "update-value")]
    UpdateValue,
    /// Terminate the round and switch to the next one.
    #[serde(rename = "next-round")]
    NextRound,
    /// Terminate the round and open a new term.
    #[serde(rename = "next-term")]
    NextTerm,
    /// Stay put, observe until the round is over.
    #[serde(rename = "nothing")]
    Nothing,
}

/// Consensus command consumed by the scheduler worker.
///
/// The behaviour travels as an opaque serialized hint so that the command
/// itself stays stable while behaviours evolve.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct ConsensusCommand {
    /// Milliseconds left before acting on the hint.
    pub counting_ms: u64,
    /// Milliseconds the production attempt may take once started.
    pub timeout_ms: u64,
    /// Serialized `Behaviour`.
    #[serde(with = "serde_bytes")]
    pub hint: Vec<u8>,
}

impl ConsensusCommand {
    pub fn new(counting_ms: u64, timeout_ms: u64, behaviour: Behaviour) -> Self {
        ConsensusCommand {
            counting_ms,
            timeout_ms,
            hint: behaviour.serialize(),
        }
    }

    /// Behaviour decoded from the hint.
    pub fn behaviour(&self) -> Result<Behaviour> {
        Behaviour::deserialize(&self.hint)
    }
}

/// Builds the consensus command for `miner` out of the current round state.
///
/// `previous_round` feeds the term-change quorum and `info` provides the
/// chain start time; while either one is missing the term never changes.
pub fn consensus_command(
    round: &Round,
    previous_round: Option<&Round>,
    info: Option<&ChainInfo>,
    miner: &str,
    now: u64,
) -> ConsensusCommand {
    let slot = match round.slot(miner) {
        Some(slot) => slot,
        None => return observe_command(round, now),
    };

    if slot.out_value.is_none() {
        // Production duty not yet honored within this round.
        let behaviour = match round.number {
            1 => Behaviour::InitialSlot,
            _ => Behaviour::UpdateValue,
        };
        if !round.is_time_slot_passed(miner, now) {
            let counting = match missed_predecessors(round, slot.order, now) {
                // A single missed slot right before ours is taken over at
                // once. Two or more in a row leave the schedule untouched.
                1 => 0,
                _ => slot.expected_time.saturating_sub(now),
            };
            return ConsensusCommand::new(counting, mining_limit(round), behaviour);
        }
        return match round.arrange_abnormal_mining_time(miner, now) {
            Some(time) => {
                ConsensusCommand::new(time.saturating_sub(now), mining_limit(round), behaviour)
            }
            None => observe_command(round, now),
        };
    }

    // Duty honored: line up for the round termination. The extra block
    // producer takes the closing slot, the others follow as backups.
    match round.arrange_abnormal_mining_time(miner, now) {
        Some(time) => {
            let behaviour = match is_term_over(round, previous_round, info) {
                true => Behaviour::NextTerm,
                false => Behaviour::NextRound,
            };
            ConsensusCommand::new(time.saturating_sub(now), mining_limit(round), behaviour)
        }
        None => observe_command(round, now),
    }
}

/// No duty within this round: wake up again once the round is expected to
/// be over.
fn observe_command(round: &Round, now: u64) -> ConsensusCommand {
    let missed = now.saturating_sub(round.start_time()) / round.total_millis().max(1);
    let counting = round.expected_end_time(missed).saturating_sub(now);
    ConsensusCommand::new(counting, 0, Behaviour::Nothing)
}

/// Length of the run of consecutively missed slots right before `order`.
fn missed_predecessors(round: &Round, order: u32, now: u64) -> u32 {
    let half = round.mining_interval() / 2;
    let mut run = 0;
    for prev in (1..order).rev() {
        let missed = round
            .slot_of_order(prev)
            .map_or(false, |slot| slot.out_value.is_none() && slot.expected_time + half < now);
        if !missed {
            break;
        }
        run += 1;
    }
    run
}

fn is_term_over(round: &Round, previous_round: Option<&Round>, info: Option<&ChainInfo>) -> bool {
    match (previous_round, info) {
        (Some(previous), Some(info)) => {
            round.is_time_to_change_term(previous, info.start_timestamp, round.term)
        }
        _ => false,
    }
}

/// Production time limit: three quarters of the mining interval.
fn mining_limit(round: &Round) -> u64 {
    round.mining_interval() * 3 / 4
}

enum Wake {
    Timer,
    Event,
    Closed,
}

/// Waits for a subscribed event or for `millis` to elapse, whichever comes
/// first. A delivered event cancels the pending timer.
async fn wait_wake(events: &mut BlockResponseReceiver, millis: u64) -> Wake {
    let mut timer = task::sleep(Duration::from_millis(millis)).boxed();
    future::poll_fn(move |cx: &mut Context<'_>| {
        if let Poll::Ready(res) = events.poll_next_unpin(cx) {
            return match res {
                Some(_) => Poll::Ready(Wake::Event),
                None => Poll::Ready(Wake::Closed),
            };
        }
        match timer.as_mut().poll(cx) {
            Poll::Ready(_) => Poll::Ready(Wake::Timer),
            Poll::Pending => Poll::Pending,
        }
    })
    .await
}

struct SchedulerWorker {
    /// Miner account id operated by this node.
    miner: String,
    /// Blockchain service request channel.
    bc_chan: BlockRequestSender,
}

impl SchedulerWorker {
    fn new(miner: String, bc_chan: BlockRequestSender) -> Self {
        SchedulerWorker { miner, bc_chan }
    }

    async fn send_recv(&self, request: Message) -> Result<Message> {
        let receiver = self
            .bc_chan
            .send(request)
            .await
            .map_err(|_err| Error::new_ext(ErrorKind::Other, "blockchain service seems down"))?;
        receiver
            .recv()
            .await
            .map_err(|_err| Error::new_ext(ErrorKind::Other, "blockchain service seems down"))
    }

    async fn load_round(&self, number: u64) -> Option<Round> {
        match self.send_recv(Message::GetRoundRequest { number }).await {
            Ok(Message::GetRoundResponse { round }) => Some(round),
            _ => None,
        }
    }

    async fn load_chain_info(&self) -> Option<ChainInfo> {
        match self.send_recv(Message::GetChainInfoRequest).await {
            Ok(Message::GetChainInfoResponse { info }) => Some(info),
            _ => None,
        }
    }

    async fn next_command(&self) -> Option<ConsensusCommand> {
        let round = match self.load_round(u64::MAX).await {
            Some(round) => round,
            // Chain bootstrap: no round exists until the first block is
            // committed, keep knocking. Non-miner nodes get the trigger
            // rejected by the block service.
            None => {
                return Some(ConsensusCommand::new(
                    RETRY_PERIOD_MS,
                    RETRY_PERIOD_MS,
                    Behaviour::InitialSlot,
                ))
            }
        };
        let info = self.load_chain_info().await;
        let previous = match round.number {
            0 | 1 => None,
            number => self.load_round(number - 1).await,
        };
        let now = timestamp_millis();
        let command = consensus_command(&round, previous.as_ref(), info.as_ref(), &self.miner, now);
        trace!(
            "[scheduler] round {} command: fire in {} ms",
            round.number,
            command.counting_ms
        );
        Some(command)
    }

    /// Sends the production trigger, returns whether it was accepted.
    async fn fire(&self, command: &ConsensusCommand) -> bool {
        debug!("[scheduler] production timer fired");
        let request = Message::ProduceBlockRequest {
            hint: command.hint.clone(),
        };
        match self.send_recv(request).await {
            Ok(Message::ProduceBlockResponse { accepted }) => {
                if !accepted {
                    debug!("[scheduler] production trigger not accepted");
                }
                accepted
            }
            Ok(Message::Exception(err)) => {
                warn!("[scheduler] production trigger error: {}", err);
                false
            }
            Ok(_) | Err(_) => {
                warn!("[scheduler] unexpected response from block service");
                false
            }
        }
    }

    /// Milliseconds before the armed timer fires. Commands carrying no duty
    /// never fire below the retry period to prevent a recompute spin.
    fn arm_millis(command: &Option<ConsensusCommand>) -> u64 {
        match command {
            Some(cmd) => match cmd.behaviour() {
                Ok(Behaviour::Nothing) | Err(_) => cmd.counting_ms.max(RETRY_PERIOD_MS),
                Ok(_) => cmd.counting_ms,
            },
            None => RETRY_PERIOD_MS,
        }
    }

    pub async fn run(&mut self) {
        let request = Message::Subscribe {
            id: "scheduler".to_string(),
            events: Event::BLOCK,
        };
        let mut events = match self.bc_chan.send(request).await {
            Ok(receiver) => receiver,
            Err(_err) => {
                error!("[scheduler] blockchain service seems down");
                return;
            }
        };
        loop {
            let command = self.next_command().await;
            match wait_wake(&mut events, Self::arm_millis(&command)).await {
                Wake::Closed => break,
                // Block committed, the pending command is stale.
                Wake::Event => continue,
                Wake::Timer => (),
            }
            let command = match command {
                Some(cmd) if cmd.behaviour().ok() != Some(Behaviour::Nothing) => cmd,
                _ => continue,
            };
            // Absorb the production latency (or the rejection) before
            // computing the next command.
            let grace = match self.fire(&command).await {
                true => command.timeout_ms.max(RETRY_PERIOD_MS),
                false => RETRY_PERIOD_MS,
            };
            if let Wake::Closed = wait_wake(&mut events, grace).await {
                break;
            }
        }
        info!("[scheduler] worker loop exited");
    }
}

/// Consensus scheduler service.
pub struct SchedulerService {
    /// Worker object.
    worker: Option<SchedulerWorker>,
    /// Worker thread handler.
    handler: Option<JoinHandle<SchedulerWorker>>,
    /// To check if the worker thread is alive.
    canary: Arc<()>,
}

impl SchedulerService {
    pub fn new(miner: String, bc_chan: BlockRequestSender) -> Self {
        SchedulerService {
            worker: Some(SchedulerWorker::new(miner, bc_chan)),
            handler: None,
            canary: Arc::new(()),
        }
    }

    /// Start the service.
    pub fn start(&mut self) {
        debug!("Starting consensus scheduler service");
        if self.is_running() {
            warn!("service was already running");
            return;
        }
        let mut worker = match self.worker.take() {
            Some(worker) => worker,
            None => {
                warn!("service worker was already consumed");
                return;
            }
        };
        let mut canary = Arc::clone(&self.canary);
        let handler = thread::spawn(move || {
            let _ = Arc::get_mut(&mut canary);
            task::block_on(async {
                worker.run().await;
                worker
            })
        });
        self.handler = Some(handler);
    }

    /// Stop the service. The worker exits at the next timer wakeup once the
    /// blockchain channel is gone; this call only reclaims it for a restart.
    pub fn stop(&mut self) {
        debug!("Stopping consensus scheduler service");
        match self.handler.take() {
            Some(handler) => {
                if let Ok(worker) = handler.join() {
                    self.worker = Some(worker);
                }
            }
            None => {
                debug!("service was not running");
            }
        }
    }

    /// Check if the service is running.
    pub fn is_running(&self) -> bool {
        // Hack to intercept crashed subthreads.
        Arc::strong_count(&self.canary) == 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::schema::tests::create_test_chain_info,
        channel,
        consensus::round::tests::create_test_round,
        crypto::Hash,
    };

    const INITIAL_SLOT_HEX: &str = "ac696e697469616c2d736c6f74";
    const UPDATE_VALUE_HEX: &str = "ac7570646174652d76616c7565";
    const NEXT_ROUND_HEX: &str = "aa6e6578742d726f756e64";
    const NEXT_TERM_HEX: &str = "a96e6578742d7465726d";
    const NOTHING_HEX: &str = "a76e6f7468696e67";

    const COMMAND_HEX: &str = "93cd0bb8cd0bb8c40dac7570646174652d76616c7565";

    const OUT_VALUE_HEX: &str =
        "12202c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae";

    fn out_value() -> Hash {
        Hash::from_hex(OUT_VALUE_HEX).unwrap()
    }

    #[test]
    fn behaviour_serialize() {
        for (behaviour, hex) in [
            (Behaviour::InitialSlot, INITIAL_SLOT_HEX),
            (Behaviour::UpdateValue, UPDATE_VALUE_HEX),
            (Behaviour::NextRound, NEXT_ROUND_HEX),
            (Behaviour::NextTerm, NEXT_TERM_HEX),
            (Behaviour::Nothing, NOTHING_HEX),
        ] {
            assert_eq!(hex::encode(behaviour.serialize()), hex);
        }
    }

    #[test]
    fn behaviour_deserialize() {
        let buf = hex::decode(NEXT_ROUND_HEX).unwrap();

        let behaviour = Behaviour::deserialize(&buf).unwrap();

        assert_eq!(behaviour, Behaviour::NextRound);
    }

    #[test]
    fn command_serialize() {
        let command = ConsensusCommand::new(3000, 3000, Behaviour::UpdateValue);

        let buf = command.serialize();

        assert_eq!(hex::encode(buf), COMMAND_HEX);
    }

    #[test]
    fn command_deserialize() {
        let expected = ConsensusCommand::new(3000, 3000, Behaviour::UpdateValue);
        let buf = hex::decode(COMMAND_HEX).unwrap();

        let command = ConsensusCommand::deserialize(&buf).unwrap();

        assert_eq!(command, expected);
        assert_eq!(command.behaviour().unwrap(), Behaviour::UpdateValue);
    }

    #[test]
    fn command_bad_hint() {
        let command = ConsensusCommand {
            counting_ms: 0,
            timeout_ms: 0,
            hint: vec![0xc1],
        };

        let err = command.behaviour().unwrap_err();

        assert_eq!(err.kind, crate::ErrorKind::MalformedData);
    }

    #[test]
    fn command_in_slot_production() {
        let round = create_test_round();

        let command = consensus_command(&round, None, None, "alice", 8_000);

        assert_eq!(command.behaviour().unwrap(), Behaviour::UpdateValue);
        assert_eq!(command.counting_ms, 2_000);
        assert_eq!(command.timeout_ms, 3_000);
    }

    #[test]
    fn command_first_round_bootstrap() {
        let mut round = create_test_round();
        round.number = 1;

        let command = consensus_command(&round, None, None, "alice", 8_000);

        assert_eq!(command.behaviour().unwrap(), Behaviour::InitialSlot);
        assert_eq!(command.counting_ms, 2_000);
    }

    #[test]
    fn command_takes_over_single_missed_slot() {
        let round = create_test_round();

        // Alice missed her slot, bob jumps in at once.
        let command = consensus_command(&round, None, None, "bob", 12_500);

        assert_eq!(command.behaviour().unwrap(), Behaviour::UpdateValue);
        assert_eq!(command.counting_ms, 0);
    }

    #[test]
    fn command_two_missed_slots_keep_schedule() {
        let round = create_test_round();

        // Alice and bob both missed: carol sticks to her expected time.
        let command = consensus_command(&round, None, None, "carol", 16_500);

        assert_eq!(command.behaviour().unwrap(), Behaviour::UpdateValue);
        assert_eq!(command.counting_ms, 1_500);
    }

    #[test]
    fn command_recovers_missed_own_slot() {
        let round = create_test_round();

        let command = consensus_command(&round, None, None, "alice", 30_000);

        assert_eq!(command.behaviour().unwrap(), Behaviour::UpdateValue);
        // Arranged one full missed round ahead.
        assert_eq!(command.counting_ms, 16_000);
    }

    #[test]
    fn command_observer_waits_round_end() {
        let round = create_test_round();

        let command = consensus_command(&round, None, None, "dave", 8_000);

        assert_eq!(command.behaviour().unwrap(), Behaviour::Nothing);
        assert_eq!(command.counting_ms, 18_000);
        assert_eq!(command.timeout_ms, 0);
    }

    #[test]
    fn command_extra_producer_terminates_round() {
        let mut round = create_test_round();
        round.slot_mut("carol").unwrap().out_value = Some(out_value());

        let command = consensus_command(&round, None, None, "carol", 20_000);

        assert_eq!(command.behaviour().unwrap(), Behaviour::NextRound);
        assert_eq!(command.counting_ms, 2_000);
    }

    #[test]
    fn command_backup_terminates_round() {
        let mut round = create_test_round();
        round.slot_mut("bob").unwrap().out_value = Some(out_value());

        let command = consensus_command(&round, None, None, "bob", 20_000);

        assert_eq!(command.behaviour().unwrap(), Behaviour::NextRound);
        // Round end plus two backup intervals.
        assert_eq!(command.counting_ms, 14_000);
    }

    #[test]
    fn command_term_change() {
        let mut previous = create_test_round();
        for slot in previous.miners.values_mut() {
            slot.out_value = Some(out_value());
        }
        let mut round = create_test_round();
        round.number = 3;
        for slot in round.miners.values_mut() {
            slot.actual_time = Some(500_000);
        }
        round.slot_mut("carol").unwrap().out_value = Some(out_value());
        let info = create_test_chain_info();

        let command =
            consensus_command(&round, Some(&previous), Some(&info), "carol", 20_000);

        assert_eq!(command.behaviour().unwrap(), Behaviour::NextTerm);
        assert_eq!(command.counting_ms, 2_000);
    }

    #[test]
    fn start_stop() {
        let (tx_chan, _rx_chan) = channel::confirmed_channel();
        let mut svc = SchedulerService::new("alice".to_string(), tx_chan);

        svc.start();
        assert!(svc.is_running());

        svc.stop();
    }
}
