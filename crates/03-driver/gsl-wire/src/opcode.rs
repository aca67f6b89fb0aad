/// APM command/response opcode space (`APM_CMD_*` / `APM_CMD_RSP_*`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ApmOpcode {
    GraphOpen = 0x0100_1000,
    GraphPrepare = 0x0100_1001,
    GraphStart = 0x0100_1002,
    GraphStop = 0x0100_1003,
    GraphSuspend = 0x0100_1004,
    GraphFlush = 0x0100_1005,
    GraphClose = 0x0100_1006,
    SetCfg = 0x0100_1010,
    GetCfg = 0x0100_1011,
    RegisterCfg = 0x0100_1012,
    DeregisterCfg = 0x0100_1013,
    RegisterSharedCfg = 0x0100_1014,
    DeregisterSharedCfg = 0x0100_1015,
    RegisterModuleEvents = 0x0100_1016,
    SharedMemMapRegions = 0x0100_1020,
    SharedSatelliteMemMapRegions = 0x0100_1021,
    SharedMemUnmapRegions = 0x0100_1022,
    SharedSatelliteMemUnmapRegions = 0x0100_1023,
    RspSharedMemMapRegions = 0x0100_1024,
    RspSharedSatelliteMemMapRegions = 0x0100_1025,
    RspGetCfg = 0x0100_1026,
    /// Generic command-acknowledgement reply shared by every command above
    /// that has no opcode-specific response payload.
    BasicRsp = 0x0100_0001,
}

impl ApmOpcode {
    pub fn from_u32(value: u32) -> Option<Self> {
        use ApmOpcode::*;
        Some(match value {
            0x0100_1000 => GraphOpen,
            0x0100_1001 => GraphPrepare,
            0x0100_1002 => GraphStart,
            0x0100_1003 => GraphStop,
            0x0100_1004 => GraphSuspend,
            0x0100_1005 => GraphFlush,
            0x0100_1006 => GraphClose,
            0x0100_1010 => SetCfg,
            0x0100_1011 => GetCfg,
            0x0100_1012 => RegisterCfg,
            0x0100_1013 => DeregisterCfg,
            0x0100_1014 => RegisterSharedCfg,
            0x0100_1015 => DeregisterSharedCfg,
            0x0100_1016 => RegisterModuleEvents,
            0x0100_1020 => SharedMemMapRegions,
            0x0100_1021 => SharedSatelliteMemMapRegions,
            0x0100_1022 => SharedMemUnmapRegions,
            0x0100_1023 => SharedSatelliteMemUnmapRegions,
            0x0100_1024 => RspSharedMemMapRegions,
            0x0100_1025 => RspSharedSatelliteMemMapRegions,
            0x0100_1026 => RspGetCfg,
            0x0100_0001 => BasicRsp,
            _ => return None,
        })
    }
}

/// Datapath opcode space (`DATA_CMD_*` / `DATA_CMD_RSP_*`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DataOpcode {
    WrSharedMemEpDataBuffer = 0x0200_2000,
    RspWrSharedMemEpDataBufferDone = 0x0200_2001,
    WrSharedMemEpEos = 0x0200_2002,
    RspWrSharedMemEpEosRendered = 0x0200_2003,
    WrSharedMemEpMediaFormat = 0x0200_2004,
    RdSharedMemEpDataBuffer = 0x0200_2010,
    RspRdSharedMemEpDataBufferDone = 0x0200_2011,
}

impl DataOpcode {
    pub fn from_u32(value: u32) -> Option<Self> {
        use DataOpcode::*;
        Some(match value {
            0x0200_2000 => WrSharedMemEpDataBuffer,
            0x0200_2001 => RspWrSharedMemEpDataBufferDone,
            0x0200_2002 => WrSharedMemEpEos,
            0x0200_2003 => RspWrSharedMemEpEosRendered,
            0x0200_2004 => WrSharedMemEpMediaFormat,
            0x0200_2010 => RdSharedMemEpDataBuffer,
            0x0200_2011 => RspRdSharedMemEpDataBufferDone,
            _ => return None,
        })
    }
}
