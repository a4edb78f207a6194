use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use super::EthercatSocket;
use crate::frame::{ETHERCAT_TYPE, MAX_FRAME, MIN_FRAME};


/**
    Raw socket allowing direct ethercat com on one ethernet port

    Raw sockets are not implemented in std::net, so here is an implementation found in `smoltcp` and `ethercrab`.
    This implementation is unix-specific

    The socket is non-blocking and its send/receive timeouts are set to the minimum, so no call on it can stall the link. The port is switched to promiscuous mode since the frames coming back from the segment do not carry its mac address.
*/
#[derive(Debug)]
pub struct EthernetSocket {
    protocol: libc::c_ushort,
    lower: libc::c_int,
}

impl EthernetSocket {
    pub fn new(interface: &str) -> io::Result<Self> {
        let protocol: u16 = ETHERCAT_TYPE;
        let mut ifreq = ifreq_for(interface)?;

        // create
        let lower = unsafe {
            let lower = libc::socket(
                // Ethernet II frames
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK,
                protocol.to_be() as i32,
            );
            if lower == -1 {
                return Err(io::Error::last_os_error());
            }
            lower
        };
        // from now on, dropping closes the socket on error
        let new = EthernetSocket {protocol, lower};

        // minimal timeouts
        let timeout = libc::timeval {tv_sec: 0, tv_usec: 1};
        setsockopt(new.lower, libc::SO_RCVTIMEO, &timeout)?;
        setsockopt(new.lower, libc::SO_SNDTIMEO, &timeout)?;
        setsockopt(new.lower, libc::SO_DONTROUTE, &(1 as libc::c_int))?;

        // interface index
        ifreq_ioctl(new.lower, &mut ifreq, libc::SIOCGIFINDEX)?;
        let index = unsafe {ifreq.ifr_data.index};

        // promiscuous and broadcast
        ifreq.ifr_data = IfreqData {flags: 0};
        ifreq_ioctl(new.lower, &mut ifreq, libc::SIOCGIFFLAGS)?;
        unsafe {ifreq.ifr_data.flags |= (libc::IFF_PROMISC | libc::IFF_BROADCAST) as libc::c_short;}
        ifreq_ioctl(new.lower, &mut ifreq, libc::SIOCSIFFLAGS)?;

        // bind
        let sockaddr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: new.protocol.to_be(),
            sll_ifindex: index,
            sll_hatype: 1,
            sll_pkttype: 0,
            sll_halen: 6,
            sll_addr: [0; 8],
        };

        unsafe {
            #[allow(trivial_casts)]
            let res = libc::bind(
                new.lower,
                &sockaddr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            );
            if res == -1 {
                return Err(io::Error::last_os_error());
            }
        }
        log::info!("ethercat socket bound to {} (interface index {})", interface, index);

        Ok(new)
    }
}

impl Drop for EthernetSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.lower);
        }
    }
}

impl AsRawFd for EthernetSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.lower
    }
}

impl EthercatSocket for EthernetSocket {
    fn receive(&self, frame: &mut [u8]) -> io::Result<usize> {
        let len = unsafe {
            libc::recv(
                self.as_raw_fd(),
                frame.as_mut_ptr() as *mut libc::c_void,
                frame.len(),
                libc::MSG_DONTWAIT,
            )
        };
        if len < 0 {
            let error = io::Error::last_os_error();
            match error.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => Ok(0),
                _ => Err(error),
            }
        }
        else {
            Ok(len as usize)
        }
    }
    fn send(&self, frame: &[u8]) -> io::Result<usize> {
        let mut packed = heapless::Vec::<u8, MAX_FRAME>::new();
        packed.extend_from_slice(frame)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too big for ethernet"))?;
        // the checksum is added by the network card
        if packed.len() < MIN_FRAME {
            packed.resize(MIN_FRAME, 0)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too big for ethernet"))?;
        }
        let data = packed.as_slice();

        let len = unsafe {
            libc::send(
                self.as_raw_fd(),
                data.as_ptr() as *const libc::c_void,
                data.len(),
                libc::MSG_DONTWAIT,
            )
        };
        if len < 0 {
            Err(io::Error::last_os_error())
        }
        else if (len as usize) != data.len() {
            Err(io::Error::new(io::ErrorKind::WriteZero, "ethernet frame partially sent"))
        }
        else {
            Ok(frame.len())
        }
    }
    fn max_frame(&self) -> usize {
        // without the checksum
        MAX_FRAME - 4
    }
}


// intermediate C-like structures and functions

#[repr(C)]
#[derive(Copy, Clone)]
union IfreqData {
    index: libc::c_int,
    flags: libc::c_short,
    // the kernel structure is bigger than the fields used here
    _size: [u8; 24],
}

#[repr(C)]
struct ifreq {
    ifr_name: [libc::c_char; libc::IF_NAMESIZE],
    ifr_data: IfreqData,
}

fn ifreq_ioctl(
    lower: libc::c_int,
    ifreq: &mut ifreq,
    cmd: libc::c_ulong,
) -> io::Result<()> {
    unsafe {
        #[allow(trivial_casts)]
        let res = libc::ioctl(lower, cmd as _, ifreq as *mut ifreq);

        if res == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn ifreq_for(name: &str) -> io::Result<ifreq> {
    // keep room for the null terminator
    if name.len() >= libc::IF_NAMESIZE {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "interface name too long"));
    }
    let mut ifreq = ifreq {
        ifr_name: [0; libc::IF_NAMESIZE],
        ifr_data: IfreqData {_size: [0; 24]},
    };
    for (i, byte) in name.as_bytes().iter().enumerate() {
        ifreq.ifr_name[i] = *byte as libc::c_char
    }
    Ok(ifreq)
}

fn setsockopt<T>(lower: libc::c_int, option: libc::c_int, value: &T) -> io::Result<()> {
    let res = unsafe {
        libc::setsockopt(
            lower,
            libc::SOL_SOCKET,
            option,
            value as *const T as *const libc::c_void,
            std::mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if res == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
