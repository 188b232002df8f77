#[rocket::main]
async fn main() -> Result<(), rocket::Error> {
    admp_hub::rocket().launch().await?;
    Ok(())
}
