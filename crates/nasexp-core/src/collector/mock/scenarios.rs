//! Pre-built host fixtures for testing.
//!
//! `typical_nas()` models a four-bay unit with two SATA disks, one NVMe
//! cache drive, two Ethernet ports, one storage enclosure and a dm-cache
//! group on a 5.x kernel.

use super::commands::MockCommands;
use super::filesystem::MockFs;

pub const NVME_SMART_LOG: &str = "\
Smart Log for NVME device:nvme0n1 namespace-id:ffffffff
critical_warning                    : 0
temperature                         : 35 C
available_spare                     : 100%
available_spare_threshold           : 10%
percentage_used                     : 12%
data_units_read                     : 1,154,955,542
data_units_written                  : 167,093,012
power_cycles                        : 35
power_on_hours                      : 44,891
unsafe_shutdowns                    : 11
media_errors                        : 0
num_err_log_entries                 : 0
";

pub const DM_CACHE_STATUS: &str = "0 1953525168 cache 8 1024/8192 2048 5000/65536 1200 300 800 200 0 5000 0 1 writeback 2 migration_threshold 2048 smq 0 rw -";

impl MockFs {
    pub fn typical_nas() -> Self {
        let mut fs = Self::new();

        fs.add_file("/proc/uptime", "12345.67 98765.43\n");
        fs.add_file("/proc/loadavg", "0.15 0.10 0.05 1/150 1234\n");
        fs.add_file("/proc/sys/kernel/osrelease", "5.10.60-qnap\n");
        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapCached:            0 kB
Active:          4096000 kB
Inactive:        2048000 kB
SwapTotal:       4096000 kB
SwapFree:        4096000 kB
",
        );
        fs.add_file(
            "/proc/stat",
            "\
cpu  10000 500 3000 80000 1000 200 100 0 0 0
cpu0 2500 125 750 20000 250 50 25 0 0 0
cpu1 2500 125 750 20000 250 50 25 0 0 0
cpu2 2500 125 750 20000 250 50 25 0 0 0
cpu3 2500 125 750 20000 250 50 25 0 0 0
ctxt 500000
btime 1700000000
",
        );
        fs.add_file(
            "/proc/diskstats",
            "\
   8       0 sda 12345 100 987654 5000 6789 50 456789 3000 0 4000 8000 0 0 0 0
   8       1 sda1 10000 80 800000 4000 5000 40 400000 2500 0 3500 6500 0 0 0 0
   8      16 sdb 2345 10 87654 500 789 5 56789 300 0 400 800 0 0 0 0
 259       0 nvme0n1 50000 200 2000000 10000 30000 150 1500000 8000 5 15000 18000 0 0 0 0
",
        );

        fs.add_interface("eth0", 1_000_000, 250_000);
        fs.add_interface("eth1", 0, 0);
        fs.add_dir("/sys/class/net/lo");

        for dev in ["sda", "sda1", "sdb", "nvme0", "nvme0n1"] {
            fs.add_device(dev);
        }

        fs
    }
}

impl MockCommands {
    pub fn typical_nas() -> Self {
        let cmds = Self::new();
        for tool in ["getsysinfo", "hal_app", "nvme", "dmsetup"] {
            cmds.add_tool(tool);
        }

        cmds.set_output("hostname", &[], "nas01\n");

        cmds.set_output("getsysinfo", &["hdnum"], "2");
        cmds.set_output("getsysinfo", &["sysfannum"], "1");
        cmds.set_output("getsysinfo", &["cputmp"], "45 C/113 F");
        cmds.set_output("getsysinfo", &["systmp"], "38 C/100 F");
        cmds.set_output("getsysinfo", &["hdtmp", "1"], "33 C/91 F");
        cmds.set_output("getsysinfo", &["hdsmart", "1"], "GOOD");
        cmds.set_output("getsysinfo", &["hdtmp", "2"], "35 C/95 F");
        cmds.set_output("getsysinfo", &["hdsmart", "2"], "GOOD");
        cmds.set_output("getsysinfo", &["sysfan", "1"], "768 RPM");

        cmds.set_output("getsysinfo", &["sysvolnum"], "2");
        cmds.set_output("getsysinfo", &["vol_desc", "0"], "[Volume DataVol1, Pool 1]");
        cmds.set_output("getsysinfo", &["vol_fs", "0"], "ext4");
        cmds.set_output("getsysinfo", &["vol_totalsize", "0"], "1.5 TB");
        cmds.set_output("getsysinfo", &["vol_status", "0"], "Ready");
        cmds.set_output("getsysinfo", &["vol_freesize", "0"], "512.0 GB");
        cmds.set_output(
            "getsysinfo",
            &["vol_desc", "1"],
            "[Single Disk Volume: Drive 2]",
        );

        cmds.set_output(
            "hal_app",
            &["--se_enum"],
            "enc_sys_id=root,enc_name=TS-453D,max_fan_num=1",
        );
        cmds.set_output(
            "hal_app",
            &["--se_sys_get_fan", "enc_sys_id=root,obj_index=0"],
            "fan = 1020 rpm",
        );

        cmds.set_output("dmsetup", &["ls", "--target", "cache"], "CG0\t(253:4)");
        cmds.set_output("dmsetup", &["status", "--noflush", "CG0"], DM_CACHE_STATUS);

        cmds.set_output("nvme", &["smart-log", "/dev/nvme0n1"], NVME_SMART_LOG);

        cmds
    }
}
