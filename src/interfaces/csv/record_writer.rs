use crate::domain::transaction::TransactionRecord;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize, PartialEq)]
struct RecordRow<'a> {
    ref_no: &'a str,
    state: &'static str,
    amount: Decimal,
    currency: &'a str,
    captured: Decimal,
    refunded: Decimal,
    gateway_transaction_id: Option<&'a str>,
    version: u64,
}

impl<'a> From<&'a TransactionRecord> for RecordRow<'a> {
    fn from(record: &'a TransactionRecord) -> Self {
        Self {
            ref_no: &record.ref_no,
            state: record.state.as_str(),
            amount: record.amount.value().normalize(),
            currency: record.currency.as_str(),
            captured: record.captured_amount.value().normalize(),
            refunded: record.refunded_amount.value().normalize(),
            gateway_transaction_id: record.gateway_transaction_id.as_deref(),
            version: record.version,
        }
    }
}

/// Writes the final record table as CSV.
pub struct RecordWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Serializes every record, header first, and flushes the sink.
    pub fn write_records<'a, I>(&mut self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a TransactionRecord>,
    {
        let mut wrote_any = false;
        for record in records {
            self.writer.serialize(RecordRow::from(record))?;
            wrote_any = true;
        }
        if !wrote_any {
            self.writer.write_record([
                "ref_no",
                "state",
                "amount",
                "currency",
                "captured",
                "refunded",
                "gateway_transaction_id",
                "version",
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::currency::Currency;
    use crate::domain::money::{Amount, Balance};
    use crate::domain::transaction::{PaymentFlow, TransactionState};
    use rust_decimal_macros::dec;

    fn written(records: &[TransactionRecord]) -> String {
        let mut buffer = Vec::new();
        RecordWriter::new(&mut buffer).write_records(records).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_writer_output() {
        let mut record = TransactionRecord::new(
            "R1",
            PaymentFlow::TwoPhase,
            Amount::new(dec!(100.00)).unwrap(),
            Currency::parse("usd").unwrap(),
        );
        record.state = TransactionState::PartiallyRefunded;
        record.captured_amount = Balance::new(dec!(20.50));
        record.refunded_amount = Balance::new(dec!(40));
        record.gateway_transaction_id = Some("sim-1".to_string());
        record.version = 4;

        let output = written(&[record]);
        let mut lines = output.lines();
        assert_eq!(
            lines.next(),
            Some("ref_no,state,amount,currency,captured,refunded,gateway_transaction_id,version")
        );
        assert_eq!(
            lines.next(),
            Some("R1,PARTIALLY_REFUNDED,100,USD,20.5,40,sim-1,4")
        );
    }

    #[test]
    fn test_writer_empty_table_keeps_header() {
        let output = written(&[]);
        assert_eq!(
            output.trim_end(),
            "ref_no,state,amount,currency,captured,refunded,gateway_transaction_id,version"
        );
    }
}
