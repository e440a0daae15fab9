use anyhow::Result;

/// Print the OpenAPI document for the API.
fn main() -> Result<()> {
    println!("{}", klaso::api::openapi().to_pretty_json()?);
    Ok(())
}
