//! Outgoing P-Data framing.
//!
//! A [`PDataWriter`] slices a run of command or data set bytes
//! into P-DATA-TF PDUs, each carrying a single PDV item
//! no larger than the peer admits.
use std::io::Write;

use snafu::{ensure, Backtrace, Snafu};

use crate::pdu::PDataValueType;

/// The smallest maximum PDU length a P-Data writer can work with:
/// a PDV item header plus two bytes of data.
pub const MIN_PDATA_PDU_LENGTH: u32 = 8;

/// The PDU length used when the peer declares no limit (0).
pub const UNBOUNDED_PDATA_PDU_LENGTH: u32 = 65_536;

/// PDU header (6) + PDV item length (4) + context ID (1) + control header (1)
const PDATA_HEADER_LEN: usize = 12;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display(
        "maximum PDU length {} is too small for P-Data (minimum is {})",
        max_pdu_length,
        MIN_PDATA_PDU_LENGTH
    ))]
    MaxPduTooSmall {
        max_pdu_length: u32,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Fill in the lengths and the message control header
/// of the P-Data PDU in `buffer`.
fn setup_pdata_header(buffer: &mut [u8], value_type: PDataValueType, is_last: bool) {
    let data_len = (buffer.len() - PDATA_HEADER_LEN) as u32;

    // full PDU length (minus PDU type and reserved byte)
    let pdu_len = data_len + 4 + 2;
    buffer[2..6].copy_from_slice(&pdu_len.to_be_bytes());

    // presentation data length (data + 2 properties below)
    let pdv_data_len = data_len + 2;
    buffer[6..10].copy_from_slice(&pdv_data_len.to_be_bytes());

    // message control header
    let mut header = 0x00;
    if value_type == PDataValueType::Command {
        header |= 0x01;
    }
    if is_last {
        header |= 0x02;
    }
    buffer[11] = header;
}

/// Determine how many bytes of PDV data fit in a PDU
/// of the given maximum length.
///
/// A length of 0 stands for no limit,
/// which is capped at [`UNBOUNDED_PDATA_PDU_LENGTH`].
/// The result is always even,
/// so that intermediate fragments keep an even length.
pub fn pdata_capacity(max_pdu_length: u32) -> Result<usize> {
    let max_pdu_length = if max_pdu_length == 0 {
        UNBOUNDED_PDATA_PDU_LENGTH
    } else {
        ensure!(
            max_pdu_length >= MIN_PDATA_PDU_LENGTH,
            MaxPduTooSmallSnafu { max_pdu_length }
        );
        max_pdu_length
    };
    // PDV item length (4) + context ID (1) + control header (1)
    let capacity = (max_pdu_length - 6) as usize;
    Ok(capacity & !1)
}

/// A P-Data value writer.
///
/// Bytes written are buffered
/// and sent as an intermediate fragment
/// whenever the buffer becomes full.
/// [`close`](Self::close) sends the remaining bytes
/// as the last fragment,
/// padded with a zero byte if their length is odd.
/// The last fragment is sent even when there is nothing left,
/// in which case it carries no data.
///
/// [`flush`](std::io::Write::flush) does not send anything.
/// If the writer is dropped without being closed,
/// the last fragment is sent on a best-effort basis.
///
/// # Example
///
/// ```no_run
/// # use std::io::Write;
/// # use dicom_ulp::association::ClientAssociationOptions;
/// # fn dicom_data() -> &'static [u8] { unimplemented!() }
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut association = ClientAssociationOptions::new()
///     .with_abstract_syntax("1.2.840.10008.5.1.4.1.1.7")
///     .establish("129.168.0.5:104")?;
///
/// let presentation_context_id = association.presentation_contexts()[0].id;
///
/// let mut pdata = association.send_pdata(presentation_context_id)?;
/// pdata.write_all(dicom_data())?;
/// pdata.close()?;
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct PDataWriter<W: Write> {
    buffer: Vec<u8>,
    stream: W,
    capacity: usize,
    value_type: PDataValueType,
    closed: bool,
}

impl<W> std::fmt::Debug for PDataWriter<W>
where
    W: Write,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PDataWriter")
            .field("presentation_context_id", &self.buffer[10])
            .field("value_type", &self.value_type)
            .field("buffered", &(self.buffer.len() - PDATA_HEADER_LEN))
            .field("capacity", &self.capacity)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<W> PDataWriter<W>
where
    W: Write,
{
    /// Construct a new P-Data value writer.
    ///
    /// `max_pdu_length` is the maximum PDU length admitted by the peer.
    pub fn new(
        stream: W,
        presentation_context_id: u8,
        value_type: PDataValueType,
        max_pdu_length: u32,
    ) -> Result<Self> {
        let capacity = pdata_capacity(max_pdu_length)?;
        let mut buffer = Vec::with_capacity(PDATA_HEADER_LEN + capacity.min(1 << 16));
        buffer.extend([
            // PDU-type + reserved byte
            0x04,
            0x00,
            // full PDU length, unknown at this point
            0xFF,
            0xFF,
            0xFF,
            0xFF,
            // presentation data length, unknown at this point
            0xFF,
            0xFF,
            0xFF,
            0xFF,
            // presentation context id
            presentation_context_id,
            // message control header, unknown at this point
            0xFF,
        ]);

        Ok(PDataWriter {
            buffer,
            stream,
            capacity,
            value_type,
            closed: false,
        })
    }

    /// The maximum number of data bytes in each fragment.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Send the remaining bytes as the last fragment.
    pub fn close(mut self) -> std::io::Result<()> {
        self.close_impl()
    }

    fn close_impl(&mut self) -> std::io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if (self.buffer.len() - PDATA_HEADER_LEN) % 2 == 1 {
            self.buffer.push(0);
        }
        setup_pdata_header(&mut self.buffer, self.value_type, true);
        self.stream.write_all(&self.buffer)?;
        self.buffer.truncate(PDATA_HEADER_LEN);
        Ok(())
    }

    /// Send the full buffer as an intermediate fragment.
    fn dispatch_pdu(&mut self) -> std::io::Result<()> {
        debug_assert_eq!(self.buffer.len(), PDATA_HEADER_LEN + self.capacity);
        setup_pdata_header(&mut self.buffer, self.value_type, false);
        self.stream.write_all(&self.buffer)?;

        // back to just the header
        self.buffer.truncate(PDATA_HEADER_LEN);
        Ok(())
    }
}

impl<W> Write for PDataWriter<W>
where
    W: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "P-Data writer is already closed",
            ));
        }

        let mut remaining = buf;
        while !remaining.is_empty() {
            let room = PDATA_HEADER_LEN + self.capacity - self.buffer.len();
            let (head, tail) = remaining.split_at(room.min(remaining.len()));
            self.buffer.extend_from_slice(head);
            remaining = tail;
            if self.buffer.len() == PDATA_HEADER_LEN + self.capacity {
                self.dispatch_pdu()?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<W> Drop for PDataWriter<W>
where
    W: Write,
{
    fn drop(&mut self) {
        let _ = self.close_impl();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rstest::rstest;

    use crate::pdu::{read_pdu, PDataValue, PDataValueType, Pdu, MINIMUM_PDU_SIZE};

    use super::{pdata_capacity, Error, PDataWriter};

    /// Split a byte stream of P-Data PDUs into its PDV items.
    fn collect_pdvs(mut bytes: &[u8]) -> Vec<PDataValue> {
        let mut out = vec![];
        while !bytes.is_empty() {
            match read_pdu(&mut bytes, crate::pdu::MAXIMUM_PDU_SIZE, false).unwrap() {
                Pdu::PData { data } => out.extend(data),
                pdu => panic!("Expected PData, got {:?}", pdu),
            }
        }
        out
    }

    #[test]
    fn test_write_pdata_and_close() {
        let presentation_context_id = 12;

        let mut buf = Vec::new();
        {
            let mut writer = PDataWriter::new(
                &mut buf,
                presentation_context_id,
                PDataValueType::Data,
                MINIMUM_PDU_SIZE,
            )
            .unwrap();
            writer.write_all(&(0..64).collect::<Vec<u8>>()).unwrap();
            writer.close().unwrap();
        }

        let pdvs = collect_pdvs(&buf);
        assert_eq!(pdvs.len(), 1);
        let pdv = &pdvs[0];
        assert_eq!(pdv.value_type, PDataValueType::Data);
        assert_eq!(pdv.presentation_context_id, presentation_context_id);
        assert!(pdv.is_last);
        assert_eq!(pdv.data, (0..64).collect::<Vec<u8>>());
    }

    #[test]
    fn test_write_large_pdata_and_close() {
        let my_data: Vec<_> = (0..9000).map(|x: u32| x as u8).collect();

        let mut buf = Vec::new();
        {
            let mut writer =
                PDataWriter::new(&mut buf, 32, PDataValueType::Data, MINIMUM_PDU_SIZE).unwrap();
            writer.write_all(&my_data).unwrap();
            writer.close().unwrap();
        }

        let pdvs = collect_pdvs(&buf);
        assert_eq!(pdvs.len(), 3);
        assert_eq!(pdvs[0].data.len(), 4090);
        assert_eq!(pdvs[1].data.len(), 4090);
        assert_eq!(pdvs[2].data.len(), 9000 - 2 * 4090);
        assert!(!pdvs[0].is_last);
        assert!(!pdvs[1].is_last);
        assert!(pdvs[2].is_last);

        let all: Vec<u8> = pdvs.into_iter().flat_map(|pdv| pdv.data).collect();
        assert_eq!(all, my_data);
    }

    #[test]
    fn close_without_data_sends_empty_last_fragment() {
        let mut buf = Vec::new();
        PDataWriter::new(&mut buf, 1, PDataValueType::Command, MINIMUM_PDU_SIZE)
            .unwrap()
            .close()
            .unwrap();

        // item length of 2: context ID and control header only
        assert_eq!(
            buf,
            [0x04, 0x00, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x02, 0x01, 0x03]
        );
    }

    #[test]
    fn odd_data_is_padded_on_close() {
        let mut buf = Vec::new();
        {
            let mut writer =
                PDataWriter::new(&mut buf, 3, PDataValueType::Data, MINIMUM_PDU_SIZE).unwrap();
            writer.write_all(&[1, 2, 3]).unwrap();
            writer.close().unwrap();
        }
        let pdvs = collect_pdvs(&buf);
        assert_eq!(pdvs.len(), 1);
        assert_eq!(pdvs[0].data, vec![1, 2, 3, 0]);
    }

    #[test]
    fn flush_sends_nothing() {
        let mut buf = Vec::new();
        {
            let mut writer =
                PDataWriter::new(&mut buf, 3, PDataValueType::Data, MINIMUM_PDU_SIZE).unwrap();
            writer.write_all(&[1, 2, 3, 4]).unwrap();
            writer.flush().unwrap();
            std::mem::forget(writer);
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn drop_sends_last_fragment() {
        let mut buf = Vec::new();
        {
            let mut writer =
                PDataWriter::new(&mut buf, 5, PDataValueType::Data, MINIMUM_PDU_SIZE).unwrap();
            writer.write_all(&[9, 9]).unwrap();
        }
        let pdvs = collect_pdvs(&buf);
        assert_eq!(pdvs.len(), 1);
        assert!(pdvs[0].is_last);
    }

    #[test]
    fn exactly_full_buffer_is_sent_before_close() {
        let mut buf = Vec::new();
        {
            let mut writer = PDataWriter::new(&mut buf, 1, PDataValueType::Data, 16).unwrap();
            assert_eq!(writer.capacity(), 10);
            writer.write_all(&[7; 10]).unwrap();
            writer.close().unwrap();
        }
        let pdvs = collect_pdvs(&buf);
        assert_eq!(pdvs.len(), 2);
        assert_eq!(pdvs[0].data.len(), 10);
        assert!(!pdvs[0].is_last);
        assert!(pdvs[1].data.is_empty());
        assert!(pdvs[1].is_last);
    }

    #[test]
    fn capacity_limits() {
        assert_eq!(pdata_capacity(0).unwrap(), 65_530);
        assert_eq!(pdata_capacity(8).unwrap(), 2);
        assert_eq!(pdata_capacity(9).unwrap(), 2);
        assert_eq!(pdata_capacity(16_384).unwrap(), 16_378);
        assert!(matches!(
            pdata_capacity(7),
            Err(Error::MaxPduTooSmall {
                max_pdu_length: 7,
                ..
            })
        ));
    }

    #[rstest]
    #[case(8, &[1, 2, 3, 5, 8])]
    #[case(9, &[7, 7, 7])]
    #[case(13, &[100, 1, 1, 1])]
    #[case(64, &[33, 0, 250, 17])]
    #[case(4096, &[5000, 3])]
    fn fragments_stay_within_bound(#[case] max_pdu_length: u32, #[case] writes: &[usize]) {
        let mut buf = Vec::new();
        let mut expected = Vec::new();
        {
            let mut writer =
                PDataWriter::new(&mut buf, 1, PDataValueType::Data, max_pdu_length).unwrap();
            for (i, len) in writes.iter().enumerate() {
                let chunk = vec![i as u8 + 1; *len];
                writer.write_all(&chunk).unwrap();
                expected.extend(chunk);
            }
            writer.close().unwrap();
        }

        let pdvs = collect_pdvs(&buf);
        let (last, intermediate) = pdvs.split_last().unwrap();
        assert!(last.is_last);
        for pdv in intermediate {
            assert!(!pdv.is_last);
            assert!(pdv.data.len() <= (max_pdu_length - 6) as usize);
            assert_eq!(pdv.data.len() % 2, 0);
        }
        assert!(last.data.len() <= (max_pdu_length - 6) as usize);

        let mut all: Vec<u8> = pdvs.iter().flat_map(|pdv| pdv.data.clone()).collect();
        if expected.len() % 2 == 1 {
            expected.push(0);
        }
        all.truncate(expected.len());
        assert_eq!(all, expected);
    }
}
