use anyhow::Context;
use edge_core::codec;

pub fn decode(input: &str, format: &str) -> anyhow::Result<()> {
    let record = codec::decode_any(input).context("not a valid link or TXT value")?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&record)?),
        _ => {
            println!("version:   {}", record.version().tag());
            println!("id:        {}", record.id());
            println!("domain:    {}", record.domain());
            println!("port:      {}", record.port());
            println!("path:      {}", record.path());
            println!("protocol:  {}", record.protocol().as_str());
            println!("txt host:  {}", record.discovery_host());
        }
    }
    Ok(())
}
