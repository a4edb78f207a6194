/*!
    This module provide the trait [EthercatSocket], and its implementor [EthernetSocket] giving access to an ethercat segment through a raw ethernet port.

    A link is made of one socket, or two sockets when its ports are wired in a redundant ring. Both sockets exchange whole ethernet frames, because the link uses the source address of received frames to find out the route they took around the ring.

    Sockets must never block: the link polls them in loops bounded by deadlines, and expects a receive call to return immediately when there is no pending frame.
*/

#[cfg(target_os = "linux")]
mod ethernet;

#[cfg(target_os = "linux")]
pub use ethernet::EthernetSocket;

use std::io;

/**
    trait implementing the raw ethernet frame exchange with some network port

    Implementors are shared between tasks, so all methods take `&self`.
*/
pub trait EthercatSocket {
    /**
        receive one ethernet frame into the given buffer (starting from the ethernet header), without blocking

        Returns the number of bytes read, or `0` when there is no frame pending. A frame bigger than the buffer is truncated.
    */
    fn receive(&self, frame: &mut [u8]) -> io::Result<usize>;

    /**
        send an ethernet frame contained in the given buffer, without blocking

        The whole buffer will be sent, the user has to tail it to the exact data size to send. The implementor is responsible for any padding required by the medium. Returns the number of bytes of the given buffer sent.
    */
    fn send(&self, frame: &[u8]) -> io::Result<usize>;

    /// maximum frame size tolerated for sending by this socket
    fn max_frame(&self) -> usize;
}
