use std::error::Error;
use std::time::Duration;

use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};

use ferrobus::*;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    // initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let decode = DecodeLevel::new(
        AppDecodeLevel::DataValues,
        FrameDecodeLevel::Header,
        PhysDecodeLevel::Nothing,
    );

    let master = Master::connect_tcp(
        "127.0.0.1:502".parse()?,
        UnitId::new(1),
        MasterSettings::default()
            .retries(2)
            .response_timeout(Duration::from_secs(1))
            .decode(decode),
    )
    .await?;

    let mut reader = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    while let Some(line) = reader.next().await {
        let result = match line?.as_str() {
            "x" => return Ok(()),
            "rc" => master
                .read_coils(AddressRange::try_from(0, 5)?)
                .await
                .map(print_values),
            "rdi" => master
                .read_discrete_inputs(AddressRange::try_from(0, 5)?)
                .await
                .map(print_values),
            "rhr" => master
                .read_holding_registers(AddressRange::try_from(0, 5)?)
                .await
                .map(print_values),
            "rir" => master
                .read_input_registers(AddressRange::try_from(0, 5)?)
                .await
                .map(print_values),
            "wsc" => master
                .write_single_coil(Indexed::new(0, true))
                .await
                .map(|x| println!("{x}")),
            "wsr" => master
                .write_single_register(Indexed::new(0, 76))
                .await
                .map(|x| println!("{x}")),
            "wmc" => master
                .write_multiple_coils(WriteMultiple::from(0, vec![true, false])?)
                .await
                .map(|x| println!("{x}")),
            "wmr" => master
                .write_multiple_registers(WriteMultiple::from(0, vec![0xCA, 0xFE])?)
                .await
                .map(|x| println!("{x}")),
            "rwr" => master
                .read_write_multiple_registers(ReadWriteMultiple::new(
                    AddressRange::try_from(0, 4)?,
                    2,
                    vec![0xBE, 0xEF],
                )?)
                .await
                .map(print_values),
            _ => {
                println!("unknown command");
                Ok(())
            }
        };

        if let Err(err) = result {
            println!("error: {err}");
        }
    }

    Ok(())
}

fn print_values<T>(values: Vec<Indexed<T>>)
where
    Indexed<T>: std::fmt::Display,
{
    for x in values {
        println!("{x}");
    }
}
