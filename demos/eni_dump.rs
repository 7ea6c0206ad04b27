//! Parse a network-information file and dump the discovered slaves.

use std::path::Path;

fn main() {
    tracing_subscriber::fmt().init();

    let path = std::env::args().nth(1).expect("usage: eni_dump <eni-file>");
    let slaves = servage::eni::parse_file(Path::new(&path)).expect("parse failed");

    for slave in &slaves {
        println!("slave {:3}  vendor {:#010x}  product {:#010x}  dc {}  {}",
            slave.position, slave.vendor_id, slave.product_code,
            if slave.has_dc {"yes"} else {"no"},
            slave.name);
        for pdo in &slave.rx_pdos {
            println!("    rx [{:#06x}] {:?}", pdo.index, pdo.entries);
        }
        for pdo in &slave.tx_pdos {
            println!("    tx [{:#06x}] {:?}", pdo.index, pdo.entries);
        }
    }
    println!("{} slaves", slaves.len());
}
