use super::{LocationReport, require};
use bytes::{Buf, BufMut, BytesMut};
use tracklink_core::{Error, Result, constants::message_id::BATCH_LOCATION_UPLOAD};

/// Body of 0x0704: several location reports sent in one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLocationUpload {
    /// 0 for regular backlog, 1 for blind-area backfill.
    pub report_type: u8,
    pub items: Vec<LocationReport>,
}

impl BatchLocationUpload {
    pub fn new(report_type: u8, items: Vec<LocationReport>) -> Self {
        BatchLocationUpload { report_type, items }
    }

    /// Body size once encoded: the 3-byte header plus each item behind its
    /// 2-byte length prefix.
    pub fn encoded_len(&self) -> usize {
        3 + self.items.iter().map(|item| 2 + item.encoded_len()).sum::<usize>()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let id = BATCH_LOCATION_UPLOAD;
        require(id, buf, 3, "batch header")?;
        let count = buf.get_u16();
        let report_type = buf.get_u8();
        if count == 0 {
            return Err(Error::invalid_body(id, "item count is zero"));
        }

        let mut items = Vec::with_capacity(usize::from(count));
        for index in 0..count {
            require(id, buf, 2, "batch item length")?;
            let len = usize::from(buf.get_u16());
            if buf.len() < len {
                return Err(Error::invalid_body(
                    id,
                    format!("item {index} declares {len} bytes, {} left", buf.len()),
                ));
            }
            items.push(LocationReport::decode_for(id, &buf[..len])?);
            buf.advance(len);
        }

        if !buf.is_empty() {
            return Err(Error::invalid_body(
                id,
                format!("{} trailing bytes after {count} items", buf.len()),
            ));
        }

        Ok(BatchLocationUpload { report_type, items })
    }

    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let id = BATCH_LOCATION_UPLOAD;
        if self.items.is_empty() {
            return Err(Error::invalid_body(id, "item count is zero"));
        }
        let count = u16::try_from(self.items.len())
            .map_err(|_| Error::invalid_body(id, "too many items"))?;

        dst.put_u16(count);
        dst.put_u8(self.report_type);
        for item in &self.items {
            let len = u16::try_from(item.encoded_len())
                .map_err(|_| Error::invalid_body(id, "item too large"))?;
            dst.put_u16(len);
            item.encode_for(id, dst)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::ExtraItem;
    use tracklink_core::BcdTimestamp;

    fn report(lat: f64) -> LocationReport {
        LocationReport::new(
            lat,
            116.4,
            50,
            30.0,
            90,
            BcdTimestamp::from_bcd([0x25, 0x01, 0x02, 0x03, 0x04, 0x05]),
        )
    }

    #[test]
    fn test_batch_preserves_order() {
        let batch = BatchLocationUpload::new(0, vec![report(39.1), report(39.2), report(39.3)]);
        let mut buf = BytesMut::new();
        batch.encode(&mut buf).unwrap();

        assert_eq!(&buf[..3], &[0x00, 0x03, 0x00]);
        assert_eq!(&buf[3..5], &[0x00, 28]);
        assert_eq!(buf.len(), 3 + 3 * (2 + 28));
        assert_eq!(buf.len(), batch.encoded_len());

        let decoded = BatchLocationUpload::decode(&buf).unwrap();
        assert_eq!(decoded, batch);
        assert_eq!(decoded.items[2].latitude, 39_300_000);
    }

    #[test]
    fn test_batch_rejects_empty() {
        assert!(BatchLocationUpload::decode(&[0x00, 0x00, 0x00]).is_err());
        assert!(BatchLocationUpload::new(0, Vec::new()).encode(&mut BytesMut::new()).is_err());
    }

    #[test]
    fn test_batch_count_exceeds_items() {
        let batch = BatchLocationUpload::new(1, vec![report(10.0)]);
        let mut buf = BytesMut::new();
        batch.encode(&mut buf).unwrap();
        buf[1] = 2;
        let err = BatchLocationUpload::decode(&buf).unwrap_err();
        assert!(matches!(err, Error::InvalidBody { message_id: 0x0704, .. }));
    }

    #[test]
    fn test_batch_trailing_bytes() {
        let batch = BatchLocationUpload::new(1, vec![report(10.0)]);
        let mut buf = BytesMut::new();
        batch.encode(&mut buf).unwrap();
        buf.put_u8(0xaa);
        assert!(BatchLocationUpload::decode(&buf).is_err());
    }

    #[test]
    fn test_batch_item_errors_name_the_batch() {
        let oversized = report(10.0).with_extra(ExtraItem::new(0xe1, vec![0u8; 300]));
        let batch = BatchLocationUpload::new(0, vec![report(10.0), oversized]);
        let err = batch.encode(&mut BytesMut::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidBody { message_id: 0x0704, .. }));

        let single = report(10.0).with_extra(ExtraItem::new(0xe1, vec![0u8; 300]));
        let err = single.encode(&mut BytesMut::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidBody { message_id: 0x0200, .. }));
    }
}
