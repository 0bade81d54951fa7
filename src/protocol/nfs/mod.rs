//! NFS protocol implementation module.
//!
//! This module provides the COMPOUND runtime for NFS version 4, covering
//! minor versions 0, 1 and 2. Unlike earlier protocol generations there is
//! no MOUNT or PORTMAP side channel: clients connect to the well-known
//! port, negotiate a client id in-band (SETCLIENTID or EXCHANGE_ID), and
//! every filesystem operation rides inside the COMPOUND procedure.

pub mod v4;
