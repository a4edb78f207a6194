use std::time::Duration;
use futures_concurrency::future::Join;
use etherlink::{Link, LinkConfig, PduCommand, EthercatResult};

/// count the devices on a segment and read their esc type, optionally through a redundant ring
#[tokio::main]
async fn main() -> EthercatResult<()> {
    env_logger::init();
    let mut args = std::env::args().skip(1);
    let primary = args.next().unwrap_or_else(|| String::from("eno1"));
    let secondary = args.next();
    let link = Link::open(&primary, secondary.as_deref(), LinkConfig::default())?;
    let timeout = Duration::from_millis(10);

    // broadcast read of the esc type register, every device increments the working counter
    let index = link.acquire()?;
    let offset = link.setup_datagram(index, PduCommand::BRD, 0, 0x0000, &[0; 2])?;
    let answers = link.confirm(index, timeout).await;
    let mut data = [0; 2];
    link.read_datagram(index, offset, &mut data)?;
    link.release(index);
    println!("{:?} devices on {:?} link, esc type {:?}", answers, link.redundancy(), data);

    // simultaneous transactions
    let read = |address: u16| {
        let link = &link;
        async move {
            let index = link.acquire()?;
            link.setup_datagram(index, PduCommand::BRD, 0, address, &[0; 2])?;
            let answers = link.confirm(index, timeout).await;
            link.release(index);
            EthercatResult::Ok(answers)
        }
    };
    let (status, control) = (read(0x0130), read(0x0120)).join().await;
    println!("al status answered by {:?}, al control answered by {:?}", status?, control?);

    Ok(())
}
