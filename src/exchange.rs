/*!
    bounded waits for the answers of a [Link], and reconciliation of the answers of redundant ports.

    Waiting is a poll loop of non-blocking socket reads separated by short sleeps. No lock is held while sleeping, so many tasks can wait on the same link, each one dispatching to the others the frames it reads.
*/

use crate::{
    link::{Link, Side},
    frame::{Route, SourceTag},
    slot::Index,
    timer::{pause, Deadline},
    };
use core::time::Duration;


impl Link {
    /**
        wait for the answer to a frame already sent with [Self::transmit_redundant]

        In redundant mode the answers of both ports are reconciled, in case of a broken ring the frame is resent on the secondary port.

        Returns the working counter of the answer, or `None` if no usable answer came before the timeout.
    */
    pub async fn wait(&self, index: Index, timeout: Duration) -> Option<u16> {
        self.wait_until(index, Deadline::after(timeout)).await
    }

    /**
        send the frame of this slot and wait for its answer, retrying until the timeout.

        Each sending is given [LinkConfig::return_timeout](crate::LinkConfig::return_timeout) to be answered, or the time left if shorter. The frame is sent again as long as no answer came and the timeout is not reached. A failed sending does not give the slot back to the allocator, the index stays owned by the caller until released.

        Returns the working counter of the answer, or `None` if no usable answer came before the timeout. Interpreting the working counter is the caller's business.
    */
    pub async fn confirm(&self, index: Index, timeout: Duration) -> Option<u16> {
        let outer = Deadline::after(timeout);
        loop {
            if let Err(error) = self.transmit_redundant(index) {
                log::debug!("frame {} not sent, waiting for the next attempt: {}", index.value(), error);
            }
            self.reclaim(index);
            let inner = Deadline::after(timeout.min(self.config.return_timeout)).min(outer);
            let wkc = self.wait_until(index, inner).await;
            if wkc.is_some() || outer.is_expired()
                {return wkc}
            log::debug!("no answer to frame {}, sending again", index.value());
        }
    }

    async fn wait_until(&self, index: Index, deadline: Deadline) -> Option<u16> {
        let (wkc, wkc2) = self.poll_both(index, deadline).await;
        if self.secondary.is_none()
            {return wkc}
        self.reconcile(index, wkc, wkc2).await
    }

    /// poll both ports until both answered or the deadline expired
    async fn poll_both(&self, index: Index, deadline: Deadline) -> (Option<u16>, Option<u16>) {
        let redundant = self.secondary.is_some();
        let mut wkc = None;
        let mut wkc2 = None;
        loop {
            if wkc.is_none() {
                wkc = self.poll(index, Side::Primary);
            }
            if redundant && wkc2.is_none() {
                wkc2 = self.poll(index, Side::Secondary);
            }
            if (wkc.is_some() && (wkc2.is_some() || ! redundant)) || deadline.is_expired()
                {break}
            pause(&deadline, self.config.poll_interval).await;
        }
        (wkc, wkc2)
    }

    /// poll one port until it answered or the deadline expired
    async fn poll_one(&self, index: Index, side: Side, deadline: Deadline) -> Option<u16> {
        loop {
            let wkc = self.poll(index, side);
            if wkc.is_some() || deadline.is_expired()
                {return wkc}
            pause(&deadline, self.config.poll_interval).await;
        }
    }

    fn poll(&self, index: Index, side: Side) -> Option<u16> {
        self.receive(index, side).ok().flatten()
    }

    /**
        combine the answers received on both ports

        Frames are tagged with the port they left from, so the routes of the answers tell the state of the ring:

        - primary port got the pass-through frame and secondary port got the data frame: the ring is closed, the data frame went through every device
        - secondary port got its own frame back, and primary port got nothing or its own frame back: the ring is open, the data frame (or what the primary side made of it) is sent again through the secondary port to reach the devices behind the break
        - anything else: the primary answer stands
    */
    async fn reconcile(&self, index: Index, wkc: Option<u16>, wkc2: Option<u16>) -> Option<u16> {
        let primrx = match wkc {
            Some(_) => self.route(index, Side::Primary).unwrap_or(Route::Missing),
            None => Route::Missing,
        };
        let secrx = match wkc2 {
            Some(_) => self.route(index, Side::Secondary).unwrap_or(Route::Missing),
            None => Route::Missing,
        };

        match (primrx, secrx) {
            (Route::Tagged(SourceTag::Secondary), Route::Tagged(SourceTag::Primary)) => {
                self.adopt_secondary(index);
                wkc2
            },
            (Route::Missing, Route::Tagged(SourceTag::Secondary))
            | (Route::Tagged(SourceTag::Primary), Route::Tagged(SourceTag::Secondary)) => {
                log::debug!("ring is open, repairing frame {} through secondary port", index.value());
                if primrx == Route::Tagged(SourceTag::Primary) {
                    if let Err(error) = self.forward_primary(index) {
                        log::debug!("cannot forward answer of frame {}: {}", index.value(), error);
                    }
                }
                if self.transmit(index, Side::Secondary).is_err() {
                    self.reclaim(index);
                    return wkc
                }
                let repaired = self.poll_one(index, Side::Secondary, Deadline::after(self.config.repair_timeout)).await;
                if repaired.is_some() {
                    self.adopt_secondary(index);
                    repaired
                }
                else {
                    log::debug!("no answer to repaired frame {}", index.value());
                    wkc
                }
            },
            _ => wkc,
        }
    }
}
