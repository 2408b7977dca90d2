use bytes::Bytes;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use groundlink_core::swupd::{
    file_hash, total_packets, Confirm, ConfirmReply, DataPacket, DataReply, StartResume,
    StartResumeReply, SwUpdCommand, NO_PACKET, SW_UPD_DATA_SIZE, SW_UPD_PACKET_SIZE,
};
use groundlink_core::wire::FrameType;
use groundlink_services::{start_transfer, TransferError, TransferPhase, TransferSession};

use crate::*;

// ── Simulated update receiver ─────────────────────────────────────────────────

/// The far end of a software update, as the server relays it.
#[derive(Default)]
pub struct UpdatePeer {
    /// Bytes already on board from an earlier attempt.
    pub held: Vec<u8>,
    /// Packets refused on first receipt.
    pub nack_once: Vec<i32>,
    /// Packets refused every time.
    pub reject: Option<i32>,
    /// Packets stored damaged on first receipt.
    pub corrupt_once: Vec<i32>,
}

/// What the peer saw.
#[derive(Default)]
pub struct PeerLog {
    pub file: Vec<u8>,
    pub primer_command: u8,
    pub primer_bytes_sent: i32,
    pub packets: Vec<i32>,
    pub confirms: u32,
}

impl UpdatePeer {
    /// Answer the transfer until the file is confirmed.
    pub async fn serve(mut self, conn: &mut ServerConn) -> Result<PeerLog> {
        let mut log = PeerLog::default();
        let mut damaged: Option<i32> = None;

        loop {
            let frame = conn.read_kind(FrameType::Data).await?;
            let payload = frame.payload();
            if payload.len() != SW_UPD_PACKET_SIZE {
                bail!("unexpected payload of {} bytes", payload.len());
            }

            match SwUpdCommand::try_from(payload[0])? {
                SwUpdCommand::Start | SwUpdCommand::Resume => {
                    let primer = StartResume::read_from(payload).context("short primer")?;
                    let total_bytes = primer.total_bytes;
                    log.primer_command = primer.command;
                    log.primer_bytes_sent = primer.bytes_sent;
                    log.file = vec![0u8; total_bytes as usize];
                    log.file[..self.held.len()].copy_from_slice(&self.held);

                    let mut reply = StartResumeReply::new_zeroed();
                    reply.command = SwUpdCommand::StartResumeReply.into();
                    reply.received_bytes = self.held.len() as i32;
                    reply.total_packets = total_packets(total_bytes);
                    conn.send(FrameType::Data, reply.as_bytes(), 0).await?;
                }
                SwUpdCommand::Data => {
                    let packet = DataPacket::read_from(payload).context("short data packet")?;
                    let number = packet.header.packet_number;
                    let size = packet.header.data_size as usize;
                    let start = number as usize * SW_UPD_DATA_SIZE;
                    log.file[start..start + size].copy_from_slice(&packet.data[..size]);
                    log.packets.push(number);

                    if let Some(i) = self.corrupt_once.iter().position(|&n| n == number) {
                        self.corrupt_once.remove(i);
                        log.file[start] ^= 0xFF;
                        damaged = Some(number);
                    } else if damaged == Some(number) {
                        damaged = None;
                    }

                    let refused = self.reject == Some(number)
                        || match self.nack_once.iter().position(|&n| n == number) {
                            Some(i) => {
                                self.nack_once.remove(i);
                                true
                            }
                            None => false,
                        };

                    let mut reply = DataReply::new_zeroed();
                    reply.command = SwUpdCommand::DataReply.into();
                    reply.received = !refused as u8;
                    reply.packet_number = number;
                    reply.total_packets = total_packets(log.file.len() as i32);
                    conn.send(FrameType::Data, reply.as_bytes(), 0).await?;
                }
                SwUpdCommand::Confirm => {
                    let confirm = Confirm::read_from(payload).context("short confirm")?;
                    log.confirms += 1;
                    let hash = file_hash(&log.file);
                    let confirmed = hash == confirm.hash;

                    let mut reply = ConfirmReply::new_zeroed();
                    reply.command = SwUpdCommand::ConfirmReply.into();
                    reply.confirmed = confirmed as u8;
                    reply.packet_number = damaged.unwrap_or(NO_PACKET);
                    reply.total_packets = confirm.total_packets;
                    reply.hash = hash;
                    conn.send(FrameType::Data, reply.as_bytes(), 0).await?;

                    if confirmed {
                        return Ok(log);
                    }
                }
                other => bail!("client sent a reply command {:?}", other),
            }
        }
    }
}

fn firmware(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// A fresh transfer with one refused packet: the file arrives byte for byte
/// and the refused packet is the only retransmission.
#[tokio::test]
async fn transfer_survives_refused_packet() -> Result<()> {
    let (client, mut server) = connected_pair().await?;
    let data = firmware(500);

    let session = TransferSession::new("fw.bin", 3, Bytes::from(data.clone()))?;
    let handle = start_transfer(&client.link, &client.transfers, &client.config.transfer, session)?;
    assert!(client.transfers.is_busy());

    let peer = UpdatePeer {
        nack_once: vec![3],
        ..Default::default()
    };
    let log = peer.serve(&mut server).await?;
    let report = handle.await??;

    assert_eq!(log.file, data);
    assert_eq!(log.primer_command, u8::from(SwUpdCommand::Start));
    assert_eq!(log.primer_bytes_sent, 0);
    assert_eq!(log.packets.iter().filter(|&&n| n == 3).count(), 2);
    assert_eq!(log.confirms, 1);

    assert_eq!(report.total_packets, 11);
    assert_eq!(report.retransmissions, 1);
    // primer + 11 packets + one resend + confirm
    assert_eq!(report.packets_sent, 14);

    let progress = client.transfers.progress();
    assert_eq!(progress.phase, TransferPhase::Finished);
    assert!(progress.error.is_none());
    assert!(!client.transfers.is_busy());

    client.stop().await
}

/// A resumed transfer sends a Resume primer and streams only what the peer
/// does not hold.
#[tokio::test]
async fn transfer_resumes_where_peer_left_off() -> Result<()> {
    let (client, mut server) = connected_pair().await?;
    let data = firmware(560);

    let session =
        TransferSession::new("fw.bin", 1, Bytes::from(data.clone()))?.resuming_from(230);
    let handle = start_transfer(&client.link, &client.transfers, &client.config.transfer, session)?;

    let peer = UpdatePeer {
        held: data[..230].to_vec(),
        ..Default::default()
    };
    let log = peer.serve(&mut server).await?;
    let report = handle.await??;

    assert_eq!(log.file, data);
    assert_eq!(log.primer_command, u8::from(SwUpdCommand::Resume));
    assert_eq!(log.primer_bytes_sent, 230);
    assert_eq!(log.packets, (5..13).collect::<Vec<i32>>());
    assert_eq!(report.resumed_at, 5);
    assert_eq!(report.retransmissions, 0);

    client.stop().await
}

/// A packet that arrives damaged fails confirmation; the peer names it, the
/// client sends it again and the second confirmation passes.
#[tokio::test]
async fn damaged_packet_is_resent_on_confirm() -> Result<()> {
    let (client, mut server) = connected_pair().await?;
    let data = firmware(300);

    let session = TransferSession::new("fw.bin", 2, Bytes::from(data.clone()))?;
    let handle = start_transfer(&client.link, &client.transfers, &client.config.transfer, session)?;

    let peer = UpdatePeer {
        corrupt_once: vec![2],
        ..Default::default()
    };
    let log = peer.serve(&mut server).await?;
    let report = handle.await??;

    assert_eq!(log.file, data);
    assert_eq!(log.confirms, 2);
    assert_eq!(log.packets.iter().filter(|&&n| n == 2).count(), 2);
    assert_eq!(report.hash, hex_of(&file_hash(&data)));

    client.stop().await
}

/// A packet refused on every send aborts the transfer after the attempt
/// limit and frees the route.
#[tokio::test]
async fn persistent_refusal_aborts() -> Result<()> {
    let (client, mut server) = connected_pair().await?;
    let data = firmware(200);

    let session = TransferSession::new("fw.bin", 0, Bytes::from(data))?;
    let handle = start_transfer(&client.link, &client.transfers, &client.config.transfer, session)?;

    let peer = UpdatePeer {
        reject: Some(1),
        ..Default::default()
    };
    let peer = tokio::spawn(async move { peer.serve(&mut server).await });

    let err = handle.await?.unwrap_err();
    assert!(matches!(
        err,
        TransferError::PacketRejected {
            packet: 1,
            attempts: 5
        }
    ));

    let progress = client.transfers.progress();
    assert_eq!(progress.phase, TransferPhase::Aborted);
    assert_eq!(progress.packet, 1);
    assert!(progress.error.is_some());
    assert!(!client.transfers.is_busy());

    peer.abort();
    client.stop().await
}

/// Only one transfer may run at a time.
#[tokio::test]
async fn second_transfer_is_refused() -> Result<()> {
    let (client, _server) = connected_pair().await?;

    let first = TransferSession::new("a.bin", 0, Bytes::from(firmware(100)))?;
    let handle = start_transfer(&client.link, &client.transfers, &client.config.transfer, first)?;

    let second = TransferSession::new("b.bin", 0, Bytes::from(firmware(100)))?;
    let err = start_transfer(&client.link, &client.transfers, &client.config.transfer, second)
        .unwrap_err();
    assert!(matches!(err, TransferError::Busy));

    handle.abort();
    wait_until("route release", || !client.transfers.is_busy()).await?;

    client.stop().await
}

fn hex_of(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
