pub mod error;
pub mod fields;
pub mod ie;
pub mod message;
pub mod reader;
pub mod records;
pub mod sessions;
pub mod settings;
pub mod templates;
pub mod time;
pub mod utils;
pub mod writer;

pub use error::{IpfixError, Result};
pub use fields::{DataType, FieldValue, VARLEN};
pub use ie::{IeRegistry, IeSpec, InfoModel, InformationElement};
pub use message::{DecodedMessage, MessageBuilder, MessageHeader};
pub use reader::{consume_stream, Collector, MessageStreamReader};
pub use records::DataRecord;
pub use sessions::{Session, TemplateCache, TemplateKey};
pub use settings::{ErrorPolicy, Settings, TemplateRefresh};
pub use templates::{template_table, Template, TemplateRecord};
pub use utils::init_logging;
pub use writer::MessageStreamWriter;

/////////////////////////////////////////////
//// EXAMPLE OF EXPORTING AND COLLECTING
////
//
// let settings = Settings::from_file("ipfix.ini")?;
// init_logging(settings.log_level)?;
//
// let mut model = InfoModel::iana_core();
// let template = Template::new(256, model.spec_list(&["octetDeltaCount", "sourceIPv4Address"])?)?;
//
// let mut writer = MessageStreamWriter::new(TcpStream::connect("collector:4739")?, settings.exporter.clone())?;
// writer.add_template(template);
// writer.set_export_template(256)?;
// writer.export_record(&[FieldValue::from(1000u64), FieldValue::from(Ipv4Addr::new(192, 168, 1, 1))])?;
// writer.flush()?;
//
// //on the collecting side, one reader per accepted connection
// let registry: Arc<dyn IeRegistry> = Arc::new(model);
// for record in consume_stream(socket, registry, &settings.collector) {
//     match record {
//         Ok(record) => println!("{}", record.to_json()?),
//         Err(e) => warn!("{e}"),
//     }
// }
//
/////////////////////////////////////////////
