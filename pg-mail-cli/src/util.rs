use pg_mail::error::Error;
use qrcode::render::Pixel;
use qrcode::Color;

pub(crate) fn print_qr(qr: &irma::Qr) -> Result<(), Error> {
    let code = qrcode::QrCode::new(serde_json::to_string(qr)?)
        .map_err(|e| Error::FormatViolation(format!("QR code ({e})")))?;
    let scode = code
        .render::<char>()
        .quiet_zone(true)
        .module_dimensions(2, 1)
        .light_color(Pixel::default_color(Color::Dark))
        .dark_color(Pixel::default_color(Color::Light))
        .build();

    eprintln!("\n\n{}", scode);

    Ok(())
}

pub(crate) fn progress_bar(len: u64) -> indicatif::ProgressBar {
    let pb = indicatif::ProgressBar::new(len);

    if let Ok(style) = indicatif::ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} {binary_bytes_per_sec} ({eta} left)")
    {
        pb.set_style(style.progress_chars("#>-"));
    }

    pb
}
